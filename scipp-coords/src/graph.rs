use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use indexmap::{IndexMap, IndexSet};
use petgraph::{
    algo::{condensation, toposort},
    dot::Dot,
    graph::{DiGraph, NodeIndex},
};
use scipp_variable::{Coords, DataArray};

use crate::{
    error::CoordTransformError,
    kernel::CoordFunction,
    rule::{ComputeRule, FetchRule, RenameRule, Rule},
};

/// How the outputs of a graph entry are produced
#[derive(Clone)]
pub enum Producer {
    /// Alias of an existing coordinate
    Rename(String),
    Compute(Arc<dyn CoordFunction>),
}

/// User-facing description of a coordinate graph.
///
/// Each entry maps one or more output names to a [`Producer`]. Converted into
/// a [`Graph`] by [`Graph::new`].
#[derive(Clone, Default)]
pub struct GraphDict {
    entries: Vec<(Vec<String>, Producer)>,
}

impl GraphDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rename(mut self, output: impl Into<String>, input: impl Into<String>) -> Self {
        self.insert([output], Producer::Rename(input.into()));
        self
    }

    pub fn compute(
        mut self,
        output: impl Into<String>,
        func: impl CoordFunction + 'static,
    ) -> Self {
        self.insert([output], Producer::Compute(Arc::new(func)));
        self
    }

    /// A function producing several outputs at once
    pub fn compute_many<S: Into<String>>(
        mut self,
        outputs: impl IntoIterator<Item = S>,
        func: impl CoordFunction + 'static,
    ) -> Self {
        self.insert(outputs, Producer::Compute(Arc::new(func)));
        self
    }

    pub fn insert<S: Into<String>>(
        &mut self,
        outputs: impl IntoIterator<Item = S>,
        producer: Producer,
    ) {
        self.entries
            .push((outputs.into_iter().map(Into::into).collect(), producer));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[String], &Producer)> {
        self.entries
            .iter()
            .map(|(outputs, producer)| (outputs.as_slice(), producer))
    }
}

/// Coordinate names mapped to the rule that produces them.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    rules: IndexMap<String, Arc<Rule>>,
}

impl Graph {
    pub fn new(dict: &GraphDict) -> Result<Self, CoordTransformError> {
        let mut rules = IndexMap::new();
        for (outputs, producer) in dict.iter() {
            let rule = match producer {
                Producer::Rename(input) => {
                    Rule::Rename(RenameRule::new(outputs.to_vec(), input.clone()))
                }
                Producer::Compute(func) => {
                    Rule::Compute(ComputeRule::try_new(outputs.to_vec(), func.clone())?)
                }
            };
            let rule = Arc::new(rule);
            for name in outputs {
                if rules.insert(name.clone(), rule.clone()).is_some() {
                    return Err(CoordTransformError::DuplicateOutput(name.clone()));
                }
            }
        }
        Ok(Self { rules })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Rule>> {
        self.rules.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The subgraph needed to compute `targets` from `da`.
    ///
    /// Coordinates and attributes present in `da` (dense or per-event) are
    /// fetched instead of computed, even if the graph has a rule for them.
    /// Rules with several outputs are registered under all of them.
    pub fn graph_for(
        &self,
        da: &DataArray,
        targets: &IndexSet<String>,
    ) -> Result<Graph, CoordTransformError> {
        let event_coords = da.event_coords()?.unwrap_or_default();
        let dense_sources = Arc::new(merge_meta(da.coords(), da.attrs()));
        let event_sources = Arc::new(merge_meta(
            &event_coords,
            &da.event_attrs()?.unwrap_or_default(),
        ));

        let mut rules = IndexMap::new();
        let mut pending = targets.iter().rev().cloned().collect::<Vec<_>>();
        while let Some(name) = pending.pop() {
            if rules.contains_key(&name) {
                continue;
            }
            if dense_sources.contains_key(&name) || event_sources.contains_key(&name) {
                let aligned = da.coords().contains_key(&name) || event_coords.contains_key(&name);
                let fetch = FetchRule::new(
                    vec![name.clone()],
                    dense_sources.clone(),
                    event_sources.clone(),
                )
                .with_aligned(aligned);
                rules.insert(name, Arc::new(Rule::Fetch(fetch)));
                continue;
            }
            let rule = self
                .rules
                .get(&name)
                .ok_or_else(|| CoordTransformError::CoordNotFound(name.clone()))?;
            pending.extend(rule.dependencies().iter().rev().cloned());
            for out in rule.out_names() {
                rules.entry(out.clone()).or_insert_with(|| rule.clone());
            }
        }
        Ok(Graph { rules })
    }

    pub(crate) fn dependency_graph(&self) -> DependencyGraph {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        let mut index_of = |graph: &mut DiGraph<String, ()>, name: &String| {
            *indices
                .entry(name.clone())
                .or_insert_with(|| graph.add_node(name.clone()))
        };
        for name in self.rules.keys() {
            index_of(&mut graph, name);
        }
        for (name, rule) in &self.rules {
            let child = index_of(&mut graph, name);
            for dep in rule.dependencies() {
                let parent = index_of(&mut graph, dep);
                graph.update_edge(parent, child, ());
            }
        }
        DependencyGraph { graph }
    }

    /// All coordinate names such that each comes after its dependencies.
    pub fn nodes_topologically(&self) -> Result<Vec<String>, CoordTransformError> {
        let DependencyGraph { graph } = self.dependency_graph();
        let order = toposort(&graph, None).map_err(|cycle| {
            CoordTransformError::DependencyCycle(format!(
                "coordinate `{}` depends on itself",
                graph[cycle.node_id()]
            ))
        })?;
        Ok(order.into_iter().map(|idx| graph[idx].clone()).collect())
    }

    /// Rules in execution order. Rules with several outputs appear once.
    pub fn rule_sequence(&self) -> Result<Vec<Arc<Rule>>, CoordTransformError> {
        let mut sequence: Vec<Arc<Rule>> = Vec::new();
        for name in self.nodes_topologically()? {
            if let Some(rule) = self.rules.get(&name) {
                if !sequence.iter().any(|existing| Arc::ptr_eq(existing, rule)) {
                    sequence.push(rule.clone());
                }
            }
        }
        Ok(sequence)
    }

    /// Coordinates whose rule consumes `name`
    pub fn children_of(&self, name: &str) -> Vec<String> {
        self.rules
            .iter()
            .filter(|(_, rule)| rule.dependencies().iter().any(|dep| dep == name))
            .map(|(child, _)| child.clone())
            .collect()
    }

    /// Dependencies of `name`, empty for inputs and unknown names
    pub fn parents_of(&self, name: &str) -> Vec<String> {
        self.rules
            .get(name)
            .map(|rule| rule.dependencies().to_vec())
            .unwrap_or_default()
    }

    /// The graph with every cycle contracted into a single node
    pub fn condensed(&self) -> CondensedGraph {
        CondensedGraph::new(self.dependency_graph())
    }

    /// Graphviz rendering with one edge per dependency, labeled with the
    /// function computing the child.
    pub fn to_dot(&self) -> String {
        let mut graph = DiGraph::<String, String>::new();
        let mut indices = HashMap::new();
        let mut index_of = |graph: &mut DiGraph<String, String>, name: &String| {
            *indices
                .entry(name.clone())
                .or_insert_with(|| graph.add_node(name.clone()))
        };
        for (name, rule) in &self.rules {
            let child = index_of(&mut graph, name);
            let label = match rule.as_ref() {
                Rule::Fetch(_) => continue,
                Rule::Rename(_) => "rename".to_string(),
                Rule::Compute(rule) => rule.func().name().to_string(),
            };
            for dep in rule.dependencies() {
                let parent = index_of(&mut graph, dep);
                graph.add_edge(parent, child, label.clone());
            }
        }
        format!("{}", Dot::new(&graph))
    }
}

/// Coordinates first, then attributes not shadowed by a coordinate
fn merge_meta(coords: &Coords, attrs: &Coords) -> Coords {
    let mut merged = coords.clone();
    for (name, attr) in attrs {
        merged
            .entry(name.clone())
            .or_insert_with(|| attr.clone());
    }
    merged
}

pub(crate) struct DependencyGraph {
    graph: DiGraph<String, ()>,
}

/// Dependency graph whose strongly connected components are contracted
/// into single nodes, which makes it acyclic.
#[derive(Debug, Clone)]
pub struct CondensedGraph {
    graph: DiGraph<Vec<String>, ()>,
    node_of: HashMap<String, NodeIndex>,
    cycles: HashSet<NodeIndex>,
}

impl CondensedGraph {
    fn new(dependencies: DependencyGraph) -> Self {
        let self_loops = dependencies
            .graph
            .edge_indices()
            .filter_map(|edge| dependencies.graph.edge_endpoints(edge))
            .filter(|(parent, child)| parent == child)
            .map(|(node, _)| dependencies.graph[node].clone())
            .collect::<HashSet<_>>();
        let graph = condensation(dependencies.graph, true);

        let mut node_of = HashMap::new();
        let mut cycles = HashSet::new();
        for idx in graph.node_indices() {
            let members = &graph[idx];
            if members.len() > 1 || members.iter().any(|name| self_loops.contains(name)) {
                cycles.insert(idx);
            }
            for name in members {
                node_of.insert(name.clone(), idx);
            }
        }
        Self {
            graph,
            node_of,
            cycles,
        }
    }

    pub fn graph(&self) -> &DiGraph<Vec<String>, ()> {
        &self.graph
    }

    pub fn node_of(&self, name: &str) -> Option<NodeIndex> {
        self.node_of.get(name).copied()
    }

    pub fn members(&self, node: NodeIndex) -> &[String] {
        &self.graph[node]
    }

    pub fn is_cycle_node(&self, node: NodeIndex) -> bool {
        self.cycles.contains(&node)
    }

    pub fn is_in_cycle(&self, name: &str) -> bool {
        self.node_of(name)
            .is_some_and(|node| self.is_cycle_node(node))
    }
}
