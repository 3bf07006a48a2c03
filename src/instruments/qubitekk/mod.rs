//! Qubitekk photon-counting electronics.

mod cc1;

pub use cc1::{Cc1, Cc1Channel, Cc1TriggerMode, Firmware};
