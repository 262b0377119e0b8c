pub mod bins;
pub mod data_array;
pub mod dataset;
pub mod error;
pub mod variable;

pub use bins::{BinBuffer, Bins};
pub use data_array::{Coords, DataArray};
pub use dataset::Dataset;
pub use error::VariableError;
pub use variable::{BinaryOp, Values, Variable};
