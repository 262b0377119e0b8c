use indexmap::IndexSet;
use itertools::Itertools;
use scipp_variable::{DataArray, Dataset, Variable, VariableError};
use tracing::{debug, info};

use crate::{
    coord::Coord,
    coord_table::{usage_counts, CoordTable},
    error::CoordTransformError,
    graph::{Graph, GraphDict},
    options::Options,
    rename::dim_name_changes,
};

/// Compute new coordinates of a data array or dataset.
///
/// `targets` are the coordinates to compute. Everything needed to compute
/// them is looked up in `graph`, starting from the existing coordinates,
/// attributes and per-event coordinates of the input. The input itself is
/// never modified.
///
/// ```ignore
/// let speed = Kernel::new("speed", ["L", "time"], |args| Ok(args[0].try_div(&args[1])?));
/// let graph = GraphDict::new()
///     .rename("time", "tof")
///     .compute("speed", speed);
/// let result = da.transform_coords(["speed"], &graph, &Options::default())?;
/// ```
pub trait TransformCoords: Sized {
    fn transform_coords<S: Into<String>>(
        &self,
        targets: impl IntoIterator<Item = S>,
        graph: &GraphDict,
        options: &Options,
    ) -> Result<Self, CoordTransformError>;
}

impl TransformCoords for DataArray {
    fn transform_coords<S: Into<String>>(
        &self,
        targets: impl IntoIterator<Item = S>,
        graph: &GraphDict,
        options: &Options,
    ) -> Result<Self, CoordTransformError> {
        let targets = collect_targets(targets);
        let graph = Graph::new(graph)?;
        transform_data_array(self, &targets, &graph, options)
    }
}

impl TransformCoords for Dataset {
    /// Every item is transformed on its own, so coordinates shared by several
    /// items are computed once per item.
    fn transform_coords<S: Into<String>>(
        &self,
        targets: impl IntoIterator<Item = S>,
        graph: &GraphDict,
        options: &Options,
    ) -> Result<Self, CoordTransformError> {
        let targets = collect_targets(targets);
        let graph = Graph::new(graph)?;
        self.iter()
            .map(|(name, item)| {
                let transformed = transform_data_array(item, &targets, &graph, options)?;
                Ok((name.clone(), transformed))
            })
            .collect()
    }
}

/// Free-function form of [`TransformCoords::transform_coords`]
pub fn transform_coords<T, S>(
    x: &T,
    targets: impl IntoIterator<Item = S>,
    graph: &GraphDict,
    options: &Options,
) -> Result<T, CoordTransformError>
where
    T: TransformCoords,
    S: Into<String>,
{
    x.transform_coords(targets, graph, options)
}

fn collect_targets<S: Into<String>>(targets: impl IntoIterator<Item = S>) -> IndexSet<String> {
    targets.into_iter().map(Into::into).collect()
}

#[tracing::instrument(skip_all)]
fn transform_data_array(
    da: &DataArray,
    targets: &IndexSet<String>,
    graph: &Graph,
    options: &Options,
) -> Result<DataArray, CoordTransformError> {
    let graph = graph.graph_for(da, targets)?;
    let rules = graph.rule_sequence()?;
    if !options.quiet {
        info!(
            "Transforming coordinates to {}:\n{}",
            targets.iter().join(", "),
            rules.iter().map(|rule| format!("  {rule}")).join("\n")
        );
    }

    let usages = usage_counts(&rules, targets, options);
    let dim_changes = if options.rename_dims {
        dim_name_changes(&graph, da.dims(), &usages)?
    } else {
        Default::default()
    };

    let mut coords = CoordTable::from_usages(usages);
    for rule in &rules {
        debug!("{rule}");
        for (name, coord) in rule.apply(&mut coords)? {
            coords.add(name, coord);
        }
    }

    let mut out = da.clone();
    for (name, mut coord) in coords.into_coords() {
        if targets.contains(&name) {
            coord.aligned = true;
        }
        store_coord(&mut out, &name, &coord)?;
        if out.is_binned() {
            store_event_coord(&mut out, &name, &coord)?;
        }
    }
    Ok(out.rename_dims(&dim_changes)?)
}

/// Store the dense value as coordinate or attribute, replacing the entry of
/// the same name in the other category.
fn store_coord(
    da: &mut DataArray,
    name: &str,
    coord: &Coord,
) -> Result<(), CoordTransformError> {
    match &coord.dense {
        Some(dense) if coord.aligned => {
            ignore_not_found(da.remove_attr(name))?;
            da.set_coord(name, dense.clone())?;
        }
        Some(dense) => {
            ignore_not_found(da.remove_coord(name))?;
            da.set_attr(name, dense.clone())?;
        }
        None => {
            ignore_not_found(da.remove_coord(name))?;
            ignore_not_found(da.remove_attr(name))?;
        }
    }
    Ok(())
}

/// Store the per-event value like [`store_coord`], as event coordinate or
/// event attribute.
fn store_event_coord(
    da: &mut DataArray,
    name: &str,
    coord: &Coord,
) -> Result<(), CoordTransformError> {
    let Some(event) = &coord.event else {
        ignore_not_found(da.remove_event_coord(name))?;
        return ignore_not_found(da.remove_event_attr(name));
    };
    if coord.aligned {
        ignore_not_found(da.remove_event_attr(name))?;
    } else {
        ignore_not_found(da.remove_event_coord(name))?;
    }
    match set_event_meta(da, name, event.clone(), coord.aligned) {
        Err(VariableError::BinIndicesMismatch(_)) => {
            // The data does not own a contiguous buffer, e.g. because it is a
            // slice. Both sides become compact so their indices agree.
            debug!("Copying bin buffer to store event coordinate {name}");
            da.compact_bins()?;
            set_event_meta(da, name, event.copy()?, coord.aligned)?;
            Ok(())
        }
        result => Ok(result?),
    }
}

fn set_event_meta(
    da: &mut DataArray,
    name: &str,
    event: Variable,
    aligned: bool,
) -> Result<(), VariableError> {
    if aligned {
        da.set_event_coord(name, event)
    } else {
        da.set_event_attr(name, event)
    }
}

fn ignore_not_found<T>(result: Result<T, VariableError>) -> Result<(), CoordTransformError> {
    match result {
        Ok(_) => Ok(()),
        Err(err) if err.is_not_found() => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;

    fn da() -> DataArray {
        let x = Variable::from_vec(["x"], vec![3], vec![1.0, 2.0, 3.0]).unwrap();
        DataArray::new(x.clone())
            .with_coord("x", x)
            .unwrap()
    }

    #[test]
    fn test_store_coord_moves_between_categories() {
        let mut out = da();
        let x = out.coords()["x"].clone();
        store_coord(&mut out, "x", &Coord::new(Some(x.clone()), None, false)).unwrap();
        assert!(out.coords().get("x").is_none());
        assert_eq!(out.attrs().get("x"), Some(&x));

        store_coord(&mut out, "x", &Coord::new(None, None, false)).unwrap();
        assert!(out.meta("x").is_none());
    }

    #[test]
    fn test_event_coord_on_dense_data_is_ignored_when_absent() {
        let mut out = da();
        store_event_coord(&mut out, "x", &Coord::new(None, None, true)).unwrap();
        assert_eq!(out, da());
    }

    #[test]
    fn test_quiet_option_still_transforms() {
        let graph = GraphDict::new().compute(
            "y",
            Kernel::new("double", ["x"], |args| Ok(args[0].try_add(&args[0])?)),
        );
        let out = da()
            .transform_coords(["y"], &graph, &Options::default().with_quiet(true))
            .unwrap();
        assert_eq!(out.coords()["y"].to_vec().unwrap(), vec![2.0, 4.0, 6.0]);
        assert!(out.attrs().contains_key("x"));
        assert_eq!(out.dims(), ["y".to_string()]);
    }

    #[test]
    fn test_event_coord_moves_between_categories() {
        let events = DataArray::new(Variable::from_vec(["event"], vec![3], vec![1.0; 3]).unwrap())
            .with_coord("t", Variable::from_vec(["event"], vec![3], vec![1.0, 2.0, 3.0]).unwrap())
            .unwrap();
        let mut out =
            DataArray::binned(["x"], vec![2], vec![0, 1], vec![1, 3], "event", events).unwrap();
        let t = out.event_coords().unwrap().unwrap()["t"].clone();

        store_event_coord(&mut out, "t", &Coord::new(None, Some(t.clone()), false)).unwrap();
        assert!(out.event_coords().unwrap().unwrap().is_empty());
        assert_eq!(out.event_attrs().unwrap().unwrap()["t"], t);

        store_event_coord(&mut out, "t", &Coord::new(None, Some(t.clone()), true)).unwrap();
        assert_eq!(out.event_coords().unwrap().unwrap()["t"], t);
        assert!(out.event_attrs().unwrap().unwrap().is_empty());

        store_event_coord(&mut out, "t", &Coord::new(None, None, true)).unwrap();
        assert!(out.event_coords().unwrap().unwrap().is_empty());
    }
}
