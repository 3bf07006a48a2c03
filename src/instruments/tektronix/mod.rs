//! Tektronix oscilloscopes.

mod tds224;
mod tekdpo4104;

pub use tds224::{Tds224Coupling, TekTds224, TekTds224Channel, TekTds224DataSource};
pub use tekdpo4104::{TekDpo4104, TekDpo4104Channel, TekDpo4104Coupling, TekDpo4104DataSource};
