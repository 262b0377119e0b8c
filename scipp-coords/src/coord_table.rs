use std::{collections::HashMap, sync::Arc};

use indexmap::{IndexMap, IndexSet};

use crate::{
    coord::{Coord, Usages},
    error::CoordTransformError,
    options::Options,
    rule::Rule,
};

/// Coordinates produced while executing a rule sequence.
///
/// Every coordinate gets a usage budget when it is added. Consuming it as an
/// input spends one usage, and the data is released once the budget is
/// exhausted. Retention options are expressed purely as unlimited budgets.
#[derive(Debug, Default)]
pub struct CoordTable {
    coords: IndexMap<String, Coord>,
    total_usages: HashMap<String, Usages>,
}

impl CoordTable {
    pub fn new(rules: &[Arc<Rule>], targets: &IndexSet<String>, options: &Options) -> Self {
        Self::from_usages(usage_counts(rules, targets, options))
    }

    pub fn from_usages(total_usages: HashMap<String, Usages>) -> Self {
        Self {
            coords: IndexMap::new(),
            total_usages,
        }
    }

    pub fn add(&mut self, name: String, coord: Coord) {
        let usages = self.total_usages(&name);
        self.coords.insert(name, Coord { usages, ..coord });
    }

    /// Take a coordinate as the input of a rule.
    ///
    /// The coordinate is no longer aligned afterwards. When this was its last
    /// usage the table only keeps its metadata.
    pub fn consume(&mut self, name: &str) -> Result<Coord, CoordTransformError> {
        let coord = self
            .coords
            .get_mut(name)
            .ok_or_else(|| CoordTransformError::CoordNotFound(name.to_string()))?;
        if !coord.has_data() {
            return Err(CoordTransformError::CoordReleased(name.to_string()));
        }
        coord.aligned = false;
        let consumed = coord.clone();
        if let Usages::Remaining(remaining) = coord.usages {
            let remaining = remaining.saturating_sub(1);
            coord.usages = Usages::Remaining(remaining);
            if remaining == 0 {
                *coord = coord.released();
            }
        }
        Ok(consumed)
    }

    /// Usage budget of `name`, unlimited unless a rule depends on it
    pub fn total_usages(&self, name: &str) -> Usages {
        self.total_usages
            .get(name)
            .copied()
            .unwrap_or(Usages::Unlimited)
    }

    pub fn get(&self, name: &str) -> Option<&Coord> {
        self.coords.get(name)
    }

    pub fn into_coords(self) -> IndexMap<String, Coord> {
        self.coords
    }
}

/// Count how often each coordinate is consumed by `rules`, then lift the
/// budget of everything retained by `options` or requested as a target.
pub fn usage_counts(
    rules: &[Arc<Rule>],
    targets: &IndexSet<String>,
    options: &Options,
) -> HashMap<String, Usages> {
    let mut usages = HashMap::new();
    for rule in rules {
        for name in rule.dependencies() {
            if let Usages::Remaining(count) = usages
                .entry(name.clone())
                .or_insert(Usages::Remaining(0))
            {
                *count += 1;
            }
        }
    }

    for rule in rules {
        let keep = match rule.as_ref() {
            Rule::Fetch(_) => options.keep_inputs,
            Rule::Compute(_) => options.keep_intermediate,
            Rule::Rename(_) => options.keep_aliases,
        };
        if keep {
            for name in rule.out_names() {
                usages.insert(name.clone(), Usages::Unlimited);
            }
        }
    }

    for name in targets {
        usages.insert(name.clone(), Usages::Unlimited);
    }
    usages
}
