//! Agilent / Keysight instruments.

mod agilent33220a;
mod agilent34410a;

pub use agilent33220a::{Agilent33220a, Agilent33220aFunction, LoadResistance, OutputPolarity};
pub use agilent34410a::Agilent34410a;
