//! Keithley meters.

mod keithley2182;
mod keithley6485;
mod keithley6514;
mod keithley6517b;

pub use keithley2182::{Keithley2182, Keithley2182Channel, Keithley2182Mode, Keithley2182TriggerMode};
pub use keithley6485::Keithley6485;
pub use keithley6514::{ArmSource, Keithley6514, Keithley6514Mode, Keithley6514TriggerMode};
pub use keithley6517b::{Keithley6517b, Keithley6517bMode, Keithley6517bTriggerMode};
