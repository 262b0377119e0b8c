use std::collections::{BTreeSet, HashMap, HashSet};

use indexmap::IndexMap;
use petgraph::{
    algo::{has_path_connecting, toposort},
    graph::NodeIndex,
    visit::{Dfs, NodeFiltered},
    Direction,
};

use crate::{
    coord::Usages,
    error::CoordTransformError,
    graph::{CondensedGraph, Graph},
};

/// Decide which dimensions to rename after executing `graph`.
///
/// Starting at a dimension-coordinate, the walk follows the coordinates that
/// every path out of it passes through. It stops at a split that does not
/// merge again and at a node consumed together with another
/// dimension-coordinate. Splits that merge again continue at the merge. The
/// new name is the last coordinate reached that is kept in the result and is
/// not part of a cycle.
pub fn dim_name_changes(
    graph: &Graph,
    dims: &[String],
    usages: &HashMap<String, Usages>,
) -> Result<IndexMap<String, String>, CoordTransformError> {
    let condensed = graph.condensed();
    let order = toposort(condensed.graph(), None).map_err(|_| {
        CoordTransformError::InternalError("condensed coordinate graph has a cycle".to_string())
    })?;
    let associations = associate_dims(&condensed, &order, dims);

    let is_candidate = |node: NodeIndex| -> Option<String> {
        if condensed.is_cycle_node(node) {
            return None;
        }
        let name = condensed.members(node).first()?;
        usages
            .get(name)
            .map_or(true, Usages::is_unlimited)
            .then(|| name.clone())
    };

    let mut changes = IndexMap::new();
    for dim in dims {
        let Some(start) = condensed.node_of(dim) else {
            continue;
        };
        let expected = BTreeSet::from([dim.clone()]);
        let region = order
            .iter()
            .copied()
            .filter(|node| associations.get(node) == Some(&expected))
            .collect::<HashSet<_>>();
        if !region.contains(&start) {
            continue;
        }

        let reached = walk_region(&condensed, &order, &region, start);
        let new_name = reached.into_iter().filter_map(&is_candidate).last();
        if let Some(new_name) = new_name.filter(|name| name != dim) {
            tracing::debug!("Renaming dimension {dim} to {new_name}");
            changes.insert(dim.clone(), new_name);
        }
    }
    Ok(changes)
}

/// Nodes of `region` the rename walk reaches from `start`, in order.
///
/// The candidates are the nodes every path from `start` to the ends of the
/// region passes through. Between two consecutive candidates the walk
/// continues only if no node leaves the region, i.e. none is consumed
/// together with another dimension-coordinate.
fn walk_region(
    condensed: &CondensedGraph,
    order: &[NodeIndex],
    region: &HashSet<NodeIndex>,
    start: NodeIndex,
) -> Vec<NodeIndex> {
    let sinks = region
        .iter()
        .copied()
        .filter(|node| !children(condensed, *node).any(|child| region.contains(&child)))
        .collect::<Vec<_>>();
    let chain = order
        .iter()
        .copied()
        .filter(|node| region.contains(node))
        .filter(|node| *node == start || dominates(condensed, region, start, &sinks, *node))
        .collect::<Vec<_>>();

    let mut reached = vec![start];
    for pair in chain.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        let without_to =
            NodeFiltered::from_fn(condensed.graph(), |n| n != to && region.contains(&n));
        let mut dfs = Dfs::new(&without_to, from);
        while let Some(node) = dfs.next(&without_to) {
            if children(condensed, node).any(|child| !region.contains(&child)) {
                return reached;
            }
        }
        reached.push(to);
    }
    reached
}

fn children(condensed: &CondensedGraph, node: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
    condensed
        .graph()
        .neighbors_directed(node, Direction::Outgoing)
}

/// Whether every path from `start` to any of `sinks` passes through `node`
fn dominates(
    condensed: &CondensedGraph,
    region: &HashSet<NodeIndex>,
    start: NodeIndex,
    sinks: &[NodeIndex],
    node: NodeIndex,
) -> bool {
    let without_node =
        NodeFiltered::from_fn(condensed.graph(), |n| n != node && region.contains(&n));
    !sinks
        .iter()
        .any(|sink| *sink != node && has_path_connecting(&without_node, start, *sink, None))
}

/// The dimension-coordinates each node can be traced back to.
///
/// Coordinates not derived from any dimension-coordinate have an empty set
/// and therefore never block a rename when they are merged in.
fn associate_dims(
    condensed: &CondensedGraph,
    order: &[NodeIndex],
    dims: &[String],
) -> HashMap<NodeIndex, BTreeSet<String>> {
    let mut associations: HashMap<NodeIndex, BTreeSet<String>> = HashMap::new();
    for node in order {
        let mut dims_of_node = condensed
            .members(*node)
            .iter()
            .filter(|name| dims.contains(*name))
            .cloned()
            .collect::<BTreeSet<_>>();
        for parent in condensed
            .graph()
            .neighbors_directed(*node, Direction::Incoming)
        {
            if let Some(parent_dims) = associations.get(&parent) {
                dims_of_node.extend(parent_dims.iter().cloned());
            }
        }
        associations.insert(*node, dims_of_node);
    }
    associations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{coord_table::usage_counts, graph::GraphDict, kernel::Kernel, options::Options};
    use indexmap::IndexSet;
    use scipp_variable::{DataArray, Variable};

    fn mul(params: [&str; 2]) -> Kernel {
        Kernel::new("mul", params, |args| Ok(args[0].try_mul(&args[1])?))
    }

    fn changes(
        dict: GraphDict,
        da: &DataArray,
        targets: &[&str],
        options: Options,
    ) -> IndexMap<String, String> {
        let targets = targets.iter().map(|t| t.to_string()).collect::<IndexSet<_>>();
        let graph = Graph::new(&dict).unwrap().graph_for(da, &targets).unwrap();
        let rules = graph.rule_sequence().unwrap();
        let usages = usage_counts(&rules, &targets, &options);
        dim_name_changes(&graph, da.dims(), &usages).unwrap()
    }

    fn array_1d() -> DataArray {
        let a = Variable::from_vec(["a"], vec![3], vec![1.0, 2.0, 3.0]).unwrap();
        DataArray::new(a.clone()).with_coord("a", a).unwrap()
    }

    fn array_2d() -> DataArray {
        let data = Variable::from_vec(["a", "b"], vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        DataArray::new(data)
            .with_coord("a", Variable::from_vec(["a"], vec![2], vec![1.0, 2.0]).unwrap())
            .unwrap()
            .with_coord("b", Variable::from_vec(["b"], vec![2], vec![3.0, 4.0]).unwrap())
            .unwrap()
    }

    #[test]
    fn test_chain_renames_to_last() {
        let dict = GraphDict::new().rename("b", "a").rename("c", "b");
        let renames = changes(dict, &array_1d(), &["c"], Options::default());
        assert_eq!(renames, IndexMap::from([("a".to_string(), "c".to_string())]));
    }

    #[test]
    fn test_released_coord_is_not_a_candidate() {
        let dict = GraphDict::new().rename("b", "a").rename("c", "b");
        let targets = IndexSet::from(["c".to_string()]);
        let graph = Graph::new(&dict).unwrap().graph_for(&array_1d(), &targets).unwrap();
        let usages = HashMap::from([("c".to_string(), Usages::Remaining(1))]);
        let renames = dim_name_changes(&graph, &["a".to_string()], &usages).unwrap();
        assert_eq!(renames["a"], "b");
    }

    #[test]
    fn test_cycle_node_is_not_a_candidate() {
        let dict = GraphDict::new()
            .compute("b", mul(["a", "c"]))
            .rename("c", "b");
        let graph = Graph::new(&dict).unwrap();
        let renames = dim_name_changes(&graph, &["a".to_string()], &HashMap::new()).unwrap();
        assert!(renames.is_empty());
    }

    #[test]
    fn test_diamond_renames_to_merge() {
        let dict = GraphDict::new()
            .rename("b", "a")
            .rename("c", "a")
            .compute("d", mul(["b", "c"]));
        let renames = changes(dict, &array_1d(), &["d"], Options::default());
        assert_eq!(renames["a"], "d");
    }

    #[test]
    fn test_split_blocks_rename() {
        let dict = GraphDict::new().rename("b", "a").rename("c", "a");
        let renames = changes(dict, &array_1d(), &["b", "c"], Options::default());
        assert!(renames.is_empty());
    }

    #[test]
    fn test_merge_of_dims_blocks_rename() {
        let dict = GraphDict::new().compute(
            "ab",
            Kernel::new("add", ["a", "b"], |args| Ok(args[0].try_add(&args[1])?)),
        );
        let renames = changes(dict, &array_2d(), &["ab"], Options::default());
        assert!(renames.is_empty());
    }

    #[test]
    fn test_non_dim_input_does_not_block_rename() {
        let da = array_1d()
            .with_coord("scale", Variable::scalar(2.0))
            .unwrap();
        let dict = GraphDict::new().compute("b", mul(["a", "scale"]));
        let renames = changes(dict, &da, &["b"], Options::default());
        assert_eq!(renames["a"], "b");
    }

    #[test]
    fn test_dim_coord_consumed_with_other_dim_blocks_rename() {
        let dict = GraphDict::new().rename("a2", "a").compute(
            "ab",
            Kernel::new("add", ["a", "b"], |args| Ok(args[0].try_add(&args[1])?)),
        );
        let renames = changes(dict, &array_2d(), &["a2", "ab"], Options::default());
        assert!(renames.is_empty());
    }

    #[test]
    fn test_rename_stops_before_merge_of_dims() {
        let dict = GraphDict::new().rename("a2", "a").compute(
            "ab",
            Kernel::new("add", ["a2", "b"], |args| Ok(args[0].try_add(&args[1])?)),
        );
        let renames = changes(dict, &array_2d(), &["ab"], Options::default());
        assert_eq!(renames, IndexMap::from([("a".to_string(), "a2".to_string())]));
    }

    #[test]
    fn test_split_after_chain_renames_to_split_point() {
        let dict = GraphDict::new()
            .rename("b", "a")
            .rename("c", "b")
            .rename("d", "b");
        let renames = changes(dict, &array_1d(), &["c", "d"], Options::default());
        assert_eq!(renames["a"], "b");
    }

    #[test]
    fn test_multi_output_split_does_not_depend_on_targets() {
        let split = || {
            Kernel::new("split", ["a"], |args| {
                Ok(IndexMap::from([
                    ("b".to_string(), args[0].clone()),
                    ("c".to_string(), args[0].clone()),
                ]))
            })
        };
        let one = changes(
            GraphDict::new().compute_many(["b", "c"], split()),
            &array_1d(),
            &["b"],
            Options::default(),
        );
        let both = changes(
            GraphDict::new().compute_many(["b", "c"], split()),
            &array_1d(),
            &["b", "c"],
            Options::default(),
        );
        assert!(one.is_empty());
        assert_eq!(one, both);
    }
}
