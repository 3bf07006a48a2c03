//! MingHe signal generators.

mod mhs5200;

pub use mhs5200::{Mhs5200, Mhs5200Channel, Mhs5200Function};
