//! Drivers for laboratory test-and-measurement instruments.
//!
//! Every device is reached through a [`comm::Communicator`] (serial port,
//! TCP socket, GPIB adapter, USB-TMC device file, VISA resource or an
//! in-memory loopback). An [`Instrument`] layers the command/response
//! protocol on top, and a model driver from [`instruments`] turns typed
//! property accesses into that model's command strings.
//!
//! ```no_run
//! use instrumentkit::prelude::*;
//! use instrumentkit::instruments::srs::Srs345;
//!
//! # async fn run() -> instrumentkit::Result<()> {
//! let mut fg = Srs345::open_uri("gpib+usb:///dev/ttyUSB0/19").await?;
//! fg.set_frequency(Magnitude::from(1000.0)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Topologies of several instruments can be loaded from YAML with
//! [`config::load_instruments`].

pub mod comm;
pub mod config;
pub mod driver;
pub mod error;
pub mod generic_scpi;
pub mod instrument;
pub mod instruments;
pub mod property;
pub mod settings;
pub mod testing;
pub mod units;

pub use driver::{AttrPath, AttrValue, Driver, OpenInstrument};
pub use error::{InstrumentError, Result};
pub use instrument::Instrument;
pub use instruments::InstrumentCatalog;
pub use settings::Settings;
pub use units::{Magnitude, Quantity, Unit};

/// Traits and types most driver users need.
pub mod prelude {
    pub use crate::driver::{Driver, OpenInstrument};
    pub use crate::error::{InstrumentError, Result};
    pub use crate::generic_scpi::ScpiInstrument;
    pub use crate::instrument::capabilities::{
        DataSource, Electrometer, FunctionGenerator, Multimeter, Oscilloscope, PowerSupply,
        PowerSupplyChannel,
    };
    pub use crate::units::{Magnitude, Quantity, Unit};
    pub use crate::Instrument;
}
