//! Newport motion controllers.

mod errors;
mod esp301;

pub use errors::NewportError;
pub use esp301::{
    AxisParameter, AxisSetup, AxisStatus, Esp301Units, HomeSearchMode, MotorType, NewportEsp301,
    NewportEsp301Axis,
};
