pub mod coord;
pub mod coord_table;
pub mod error;
pub mod graph;
pub mod kernel;
pub mod options;
pub mod rename;
pub mod rule;
pub mod transform;

pub use coord::{Coord, Usages};
pub use coord_table::CoordTable;
pub use error::CoordTransformError;
pub use graph::{CondensedGraph, Graph, GraphDict, Producer};
pub use kernel::{CoordFunction, Kernel, KernelOutput, Signature};
pub use options::Options;
pub use rule::{ComputeRule, FetchRule, RenameRule, Rule};
pub use transform::{transform_coords, TransformCoords};
