use scipp_variable::Variable;

/// Remaining number of times a coordinate may be consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usages {
    /// Never released, e.g. targets or coordinates retained by an option
    Unlimited,
    Remaining(usize),
}

impl Usages {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Usages::Unlimited)
    }
}

/// A coordinate in flight during a transformation.
///
/// `dense` holds an ordinary (or bin-edge) coordinate, `event` a per-event
/// coordinate of binned data. Once all usages are consumed both are cleared.
#[derive(Debug, Clone)]
pub struct Coord {
    pub dense: Option<Variable>,
    pub event: Option<Variable>,
    pub aligned: bool,
    pub usages: Usages,
}

impl Coord {
    pub fn new(dense: Option<Variable>, event: Option<Variable>, aligned: bool) -> Self {
        Self {
            dense,
            event,
            aligned,
            usages: Usages::Unlimited,
        }
    }

    /// Sort a function result into the dense or event slot
    pub fn from_output(var: Variable) -> Self {
        if var.is_binned() {
            Self::new(None, Some(var), true)
        } else {
            Self::new(Some(var), None, true)
        }
    }

    pub fn has_dense(&self) -> bool {
        self.dense.is_some()
    }

    pub fn has_event(&self) -> bool {
        self.event.is_some()
    }

    pub fn has_data(&self) -> bool {
        self.has_dense() || self.has_event()
    }

    /// The same metadata without any data
    pub(crate) fn released(&self) -> Self {
        Self {
            dense: None,
            event: None,
            aligned: self.aligned,
            usages: Usages::Remaining(0),
        }
    }
}
