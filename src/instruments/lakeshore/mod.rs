//! Lake Shore Cryotronics instruments.

mod lakeshore475;

pub use lakeshore475::{
    FieldControlParams, Lakeshore475, Lakeshore475Filter, Lakeshore475Mode,
    Lakeshore475PeakDisplay, Lakeshore475PeakMode,
};
