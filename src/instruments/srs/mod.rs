//! Stanford Research Systems instruments.

mod srs345;
mod srs830;
mod srsdg645;

pub use srs345::{Srs345, Srs345Function};
pub use srs830::{
    SampleRate, Srs830, Srs830BufferMode, Srs830Coupling, Srs830FreqSource, Srs830Mode,
};
pub use srsdg645::{
    DelayChannel, Dg645Channel, Dg645Output, DisplayMode, LevelPolarity, OutputPort, SrsDg645,
    TriggerSource,
};
