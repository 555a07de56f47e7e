pub mod data;
pub mod field;

pub use data::{ChargeDirection, RawNotification, Reading};
pub use field::{CUMULATIVE_CALIBRATION, Conversion, Field, MARKER_TABLE, Rounding, round_to};
