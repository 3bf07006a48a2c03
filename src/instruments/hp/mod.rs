//! Hewlett-Packard power supplies.

mod hp6624a;
mod hp6632b;
mod hp6652a;
mod hpe3631a;

pub use hp6624a::{Hp6624a, Hp6624aChannel};
pub use hp6632b::{
    device_error_name, AlcBandwidth, DfiSource, DigitalFunction, Hp6632b, RemoteInhibit,
    SenseWindow,
};
pub use hp6652a::Hp6652a;
pub use hpe3631a::Hpe3631a;
