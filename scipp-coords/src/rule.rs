use std::{
    fmt::{Debug, Display},
    sync::Arc,
};

use indexmap::IndexMap;
use itertools::Itertools;
use scipp_variable::{Coords, Variable};

use crate::{
    coord::Coord,
    coord_table::CoordTable,
    error::CoordTransformError,
    kernel::{CoordFunction, KernelOutput, Signature},
};

/// A node of a coordinate graph, producing one or more named coordinates.
#[derive(Debug, Clone)]
pub enum Rule {
    Fetch(FetchRule),
    Rename(RenameRule),
    Compute(ComputeRule),
}

impl Rule {
    pub fn out_names(&self) -> &[String] {
        match self {
            Rule::Fetch(rule) => &rule.out_names,
            Rule::Rename(rule) => &rule.out_names,
            Rule::Compute(rule) => &rule.out_names,
        }
    }

    /// Names of the coordinates consumed by [`Rule::apply`]
    pub fn dependencies(&self) -> &[String] {
        match self {
            Rule::Fetch(_) => &[],
            Rule::Rename(rule) => std::slice::from_ref(&rule.input),
            Rule::Compute(rule) => &rule.arg_names,
        }
    }

    /// Produce the output coordinates. Inputs are consumed from `coords`.
    pub fn apply(
        &self,
        coords: &mut CoordTable,
    ) -> Result<IndexMap<String, Coord>, CoordTransformError> {
        match self {
            Rule::Fetch(rule) => Ok(rule.apply()),
            Rule::Rename(rule) => rule.apply(coords),
            Rule::Compute(rule) => rule.apply(coords),
        }
    }
}

impl Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rule::Fetch(rule) => write!(f, "Input   {}", rule.out_names.join(", ")),
            Rule::Rename(rule) => {
                write!(f, "Rename  {} <- {}", rule.out_names.join(", "), rule.input)
            }
            Rule::Compute(rule) => write!(
                f,
                "Compute {} = {}({})",
                rule.out_names.join(", "),
                rule.func.name(),
                rule.arg_names.join(", ")
            ),
        }
    }
}

/// Takes coordinates from the input array, dense and per-event
#[derive(Debug, Clone)]
pub struct FetchRule {
    out_names: Vec<String>,
    dense_sources: Arc<Coords>,
    event_sources: Arc<Coords>,
    aligned: bool,
}

impl FetchRule {
    pub fn new(
        out_names: Vec<String>,
        dense_sources: Arc<Coords>,
        event_sources: Arc<Coords>,
    ) -> Self {
        Self {
            out_names,
            dense_sources,
            event_sources,
            aligned: true,
        }
    }

    /// Inputs taken from attributes are not aligned
    pub fn with_aligned(self, aligned: bool) -> Self {
        Self { aligned, ..self }
    }

    pub fn aligned(&self) -> bool {
        self.aligned
    }

    fn apply(&self) -> IndexMap<String, Coord> {
        self.out_names
            .iter()
            .map(|name| {
                let coord = Coord::new(
                    self.dense_sources.get(name).cloned(),
                    self.event_sources.get(name).cloned(),
                    self.aligned,
                );
                (name.clone(), coord)
            })
            .collect()
    }
}

/// Makes aliases of an existing coordinate
#[derive(Debug, Clone)]
pub struct RenameRule {
    out_names: Vec<String>,
    input: String,
}

impl RenameRule {
    pub fn new(out_names: Vec<String>, input: String) -> Self {
        Self { out_names, input }
    }

    fn apply(
        &self,
        coords: &mut CoordTable,
    ) -> Result<IndexMap<String, Coord>, CoordTransformError> {
        let coord = coords.consume(&self.input)?;
        Ok(self
            .out_names
            .iter()
            .map(|name| {
                let alias = Coord::new(coord.dense.clone(), coord.event.clone(), true);
                (name.clone(), alias)
            })
            .collect())
    }
}

/// Computes coordinates with a function of other coordinates
#[derive(Clone)]
pub struct ComputeRule {
    out_names: Vec<String>,
    func: Arc<dyn CoordFunction>,
    /// Coordinate bound to each parameter of `func`
    arg_names: Vec<String>,
}

impl Debug for ComputeRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeRule")
            .field("out_names", &self.out_names)
            .field("func", &self.func.name())
            .field("arg_names", &self.arg_names)
            .finish()
    }
}

impl ComputeRule {
    pub fn try_new(
        out_names: Vec<String>,
        func: Arc<dyn CoordFunction>,
    ) -> Result<Self, CoordTransformError> {
        let Signature::Fixed(params) = func.signature() else {
            return Err(CoordTransformError::VariadicFunction(func.name().to_string()));
        };
        let arg_names = match func.input_keys() {
            Some(keys) if keys.len() != params.len() => {
                return Err(CoordTransformError::InputKeysMismatch {
                    function: func.name().to_string(),
                    expected: params.len(),
                    actual: keys.len(),
                });
            }
            Some(keys) => keys.to_vec(),
            None => params,
        };
        Ok(Self {
            out_names,
            func,
            arg_names,
        })
    }

    pub fn func(&self) -> &Arc<dyn CoordFunction> {
        &self.func
    }

    fn apply(
        &self,
        coords: &mut CoordTable,
    ) -> Result<IndexMap<String, Coord>, CoordTransformError> {
        let inputs = self
            .arg_names
            .iter()
            .map(|name| coords.consume(name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut outputs = None;
        if inputs.iter().all(Coord::has_dense) {
            outputs = Some(self.compute_pure_dense(&inputs)?);
        }
        if inputs.iter().any(Coord::has_event) {
            let event_outputs = self.compute_with_events(&inputs)?;
            outputs = Some(match outputs {
                None => event_outputs,
                Some(mut dense_outputs) => {
                    // Dense values produced alongside events take precedence
                    for (name, coord) in event_outputs {
                        let entry = dense_outputs
                            .entry(name)
                            .or_insert_with(|| Coord::new(None, None, true));
                        if coord.dense.is_some() {
                            entry.dense = coord.dense;
                        }
                        entry.event = coord.event;
                    }
                    dense_outputs
                }
            });
        }
        outputs.ok_or_else(|| {
            CoordTransformError::InternalError(format!(
                "no input of `{}` carries data",
                self.func.name()
            ))
        })
    }

    fn compute_pure_dense(
        &self,
        inputs: &[Coord],
    ) -> Result<IndexMap<String, Coord>, CoordTransformError> {
        let args = inputs
            .iter()
            .filter_map(|coord| coord.dense.clone())
            .collect::<Vec<_>>();
        let outputs = self.to_named(self.func.call(&args)?)?;
        Ok(outputs
            .into_iter()
            .map(|(name, var)| (name, Coord::new(Some(var), None, true)))
            .collect())
    }

    fn compute_with_events(
        &self,
        inputs: &[Coord],
    ) -> Result<IndexMap<String, Coord>, CoordTransformError> {
        let args = inputs
            .iter()
            .filter_map(|coord| coord.event.clone().or_else(|| coord.dense.clone()))
            .collect::<Vec<_>>();
        let outputs = self.to_named(self.func.call(&args)?)?;
        Ok(outputs
            .into_iter()
            .map(|(name, var)| (name, Coord::from_output(var)))
            .collect())
    }

    /// Match a function result to the declared outputs. Undeclared entries
    /// are dropped.
    fn to_named(
        &self,
        output: KernelOutput,
    ) -> Result<IndexMap<String, Variable>, CoordTransformError> {
        match output {
            KernelOutput::Single(var) => match self.out_names.as_slice() {
                [name] => Ok(IndexMap::from([(name.clone(), var)])),
                _ => Err(CoordTransformError::NotAMapping {
                    function: self.func.name().to_string(),
                    expected: self.out_names.clone(),
                }),
            },
            KernelOutput::Named(mut outputs) => {
                let missing = self
                    .out_names
                    .iter()
                    .filter(|name| !outputs.contains_key(*name))
                    .cloned()
                    .collect_vec();
                if !missing.is_empty() {
                    return Err(CoordTransformError::MissingOutputs {
                        function: self.func.name().to_string(),
                        missing,
                    });
                }
                Ok(self
                    .out_names
                    .iter()
                    .filter_map(|name| outputs.swap_remove(name).map(|var| (name.clone(), var)))
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{kernel::Kernel, options::Options};
    use indexmap::IndexSet;
    use scipp_variable::Bins;

    fn table_with(rules: &[Arc<Rule>], coords: Vec<(&str, Coord)>) -> CoordTable {
        let targets = IndexSet::new();
        let options = Options::default().with_keep_inputs(false);
        let mut table = CoordTable::new(rules, &targets, &options);
        for (name, coord) in coords {
            table.add(name.to_string(), coord);
        }
        table
    }

    fn dense(values: Vec<f64>) -> Variable {
        Variable::from_vec(["x"], vec![values.len()], values).unwrap()
    }

    #[test]
    fn test_variadic_function_rejected() {
        let func = Kernel::variadic("sum_all", |args| Ok(args[0].clone()));
        let result = ComputeRule::try_new(vec!["s".to_string()], Arc::new(func));
        assert!(matches!(result, Err(CoordTransformError::VariadicFunction(_))));
    }

    #[test]
    fn test_input_keys_override_parameter_names() {
        let func = Kernel::new("double", ["value"], |args| {
            Ok(args[0].try_mul(&Variable::scalar(2.0))?)
        })
        .with_input_keys(["x"]);
        let rule = ComputeRule::try_new(vec!["y".to_string()], Arc::new(func)).unwrap();
        assert_eq!(rule.arg_names, vec!["x".to_string()]);
        assert_eq!(Rule::Compute(rule).to_string(), "Compute y = double(x)");
    }

    #[test]
    fn test_single_output_for_multiple_names() {
        let func = Kernel::new("split", ["x"], |args| Ok(args[0].clone()));
        let rule = Arc::new(Rule::Compute(
            ComputeRule::try_new(vec!["a".to_string(), "b".to_string()], Arc::new(func)).unwrap(),
        ));
        let mut table = table_with(
            std::slice::from_ref(&rule),
            vec![("x", Coord::new(Some(dense(vec![1.0])), None, true))],
        );
        assert!(matches!(
            rule.apply(&mut table),
            Err(CoordTransformError::NotAMapping { .. })
        ));
    }

    #[test]
    fn test_missing_named_output() {
        let func = Kernel::new("split", ["x"], |args| {
            Ok(IndexMap::from([("a".to_string(), args[0].clone())]))
        });
        let rule = Arc::new(Rule::Compute(
            ComputeRule::try_new(vec!["a".to_string(), "b".to_string()], Arc::new(func)).unwrap(),
        ));
        let mut table = table_with(
            std::slice::from_ref(&rule),
            vec![("x", Coord::new(Some(dense(vec![1.0])), None, true))],
        );
        match rule.apply(&mut table) {
            Err(CoordTransformError::MissingOutputs { missing, .. }) => {
                assert_eq!(missing, vec!["b".to_string()])
            }
            _ => panic!("expected missing outputs"),
        }
    }

    #[test]
    fn test_rename_consumes_input_once() {
        let rule = Arc::new(Rule::Rename(RenameRule::new(
            vec!["a".to_string(), "b".to_string()],
            "x".to_string(),
        )));
        let mut table = table_with(
            std::slice::from_ref(&rule),
            vec![("x", Coord::new(Some(dense(vec![1.0, 2.0])), None, true))],
        );
        let outputs = rule.apply(&mut table).unwrap();
        assert_eq!(outputs.len(), 2);
        assert!(outputs.values().all(|coord| coord.aligned && coord.has_dense()));
        assert!(!table.get("x").unwrap().has_data());
    }

    #[test]
    fn test_event_path_dense_output_takes_precedence() {
        let func = Kernel::new("combine", ["x"], |args| {
            let on_events = args[0].is_binned();
            let level = if on_events { 2.0 } else { 1.0 };
            let e = if on_events {
                args[0].clone()
            } else {
                Variable::scalar(10.0)
            };
            Ok(IndexMap::from([
                ("y".to_string(), Variable::scalar(level)),
                ("e".to_string(), e),
            ]))
        });
        let rule = Arc::new(Rule::Compute(
            ComputeRule::try_new(vec!["y".to_string(), "e".to_string()], Arc::new(func)).unwrap(),
        ));
        let buffer = Variable::from_vec(["event"], vec![3], vec![1.0, 2.0, 3.0]).unwrap();
        let bins = Bins::try_new(vec![0, 1], vec![1, 3], "event", buffer).unwrap();
        let events = Variable::binned(["x"], vec![2], bins).unwrap();
        let mut table = table_with(
            std::slice::from_ref(&rule),
            vec![("x", Coord::new(Some(dense(vec![1.0, 2.0])), Some(events), true))],
        );

        let outputs = rule.apply(&mut table).unwrap();
        let y = &outputs["y"];
        assert_eq!(y.dense.as_ref().unwrap().to_vec().unwrap(), vec![2.0]);
        assert!(!y.has_event());
        let e = &outputs["e"];
        assert_eq!(e.dense.as_ref().unwrap().to_vec().unwrap(), vec![10.0]);
        assert_eq!(
            e.event.as_ref().unwrap().bin_values().unwrap(),
            vec![vec![1.0], vec![2.0, 3.0]]
        );
    }
}
