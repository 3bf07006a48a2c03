//! Rigol oscilloscopes.

mod ds1000;

pub use ds1000::{AcquisitionType, Coupling, RigolChannel, RigolDataSource, RigolDs1000};
