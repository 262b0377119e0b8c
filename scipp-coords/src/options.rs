use serde::{Deserialize, Serialize};

use crate::error::CoordTransformError;

/// Controls what [`crate::transform_coords`] keeps in its result.
///
/// Retention options only affect coordinates that are not targets: targets
/// are always kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Rename dimensions whose dimension-coordinate was transformed
    pub rename_dims: bool,
    /// Keep outputs of rename nodes
    pub keep_aliases: bool,
    /// Keep outputs of compute nodes
    pub keep_intermediate: bool,
    /// Keep the input coordinates that were consumed
    pub keep_inputs: bool,
    /// Do not log the execution plan
    pub quiet: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            rename_dims: true,
            keep_aliases: true,
            keep_intermediate: true,
            keep_inputs: true,
            quiet: false,
        }
    }
}

impl Options {
    pub fn from_json(json: &str) -> Result<Self, CoordTransformError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_rename_dims(self, rename_dims: bool) -> Self {
        Self { rename_dims, ..self }
    }

    pub fn with_keep_aliases(self, keep_aliases: bool) -> Self {
        Self { keep_aliases, ..self }
    }

    pub fn with_keep_intermediate(self, keep_intermediate: bool) -> Self {
        Self {
            keep_intermediate,
            ..self
        }
    }

    pub fn with_keep_inputs(self, keep_inputs: bool) -> Self {
        Self { keep_inputs, ..self }
    }

    pub fn with_quiet(self, quiet: bool) -> Self {
        Self { quiet, ..self }
    }
}
