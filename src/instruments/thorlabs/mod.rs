//! Thorlabs controllers and meters.
//!
//! The serial controllers (LCC25, SC10, TC200) echo every command, answer on
//! the next line and print a `> ` prompt when ready.

mod lcc25;
mod pm100usb;
mod sc10;
mod tc200;

pub use lcc25::{Lcc25, Lcc25Mode};
pub use pm100usb::{MeasurementConfiguration, Pm100usb, SensorFlags, SensorInfo};
pub use sc10::{Sc10, Sc10Mode};
pub use tc200::{Tc200, Tc200Mode, Tc200Sensor};

use crate::error::Result;
use crate::instrument::echo_ack;
use crate::Instrument;

pub(crate) const PROMPT: &str = "> ";

/// Replies the controllers give to a rejected command.
const COMMAND_ERRORS: [&str; 2] = ["CMD_NOT_DEFINED", "CMD_ARG_INVALID"];

/// Whether a controller accepted a command, judged from its reply.
pub(crate) fn check_cmd(response: &str) -> bool {
    !COMMAND_ERRORS.contains(&response.trim())
}

/// `\r` terminator, echoed commands and the `> ` prompt.
pub(crate) async fn configure_serial_controller(inst: &mut Instrument) -> Result<()> {
    inst.set_terminator("\r").await?;
    inst.set_prompt(Some(PROMPT));
    inst.set_ack(Some(echo_ack));
    Ok(())
}
