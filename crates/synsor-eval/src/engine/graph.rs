//! Formula dependency graph.
//!
//! One node per formula (a sensor's main formula plus each attribute
//! formula). Intra-sensor edges come from `state`-token and attribute
//! references; cross-sensor edges connect main formulas. Entity and
//! collection dependencies do not create edges — they are tracked in an
//! entity index so host change notifications can be mapped back to the
//! affected nodes.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;

use crate::deps::{Dependency, DependencyKind};

/// Engine-internal node identity (index into the node arena).
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    pub(crate) fn as_index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A sensor's state-producing formula.
    Main,
    /// An attribute formula.
    Attribute,
    /// A stub for a sensor that exists only as a reference target. A
    /// validated config never produces these, but the graph tolerates them
    /// instead of panicking mid-build.
    CrossSensor,
}

/// A formula node and its edges.
#[derive(Debug, Clone)]
pub struct DependencyNode {
    /// Graph-unique key: the sensor unique_id for main nodes, the formula id
    /// (`<unique_id>_<attr>`) for attribute nodes.
    pub key: String,
    pub sensor_id: String,
    pub formula: String,
    pub kind: NodeKind,
    pub deps: BTreeSet<Dependency>,
    /// Nodes this formula needs evaluated first.
    pub dependencies: Vec<NodeId>,
    /// Nodes that need this formula evaluated first.
    pub dependents: Vec<NodeId>,
    /// Build order; the scheduler's tie-break (sensor source order, main
    /// before attributes, attribute source order).
    pub seq: u32,
}

pub struct DependencyGraph {
    nodes: Vec<DependencyNode>,
    by_key: FxHashMap<String, NodeId>,
    /// entity_id -> nodes that read it (directly or through a variable).
    entity_index: FxHashMap<String, FxHashSet<NodeId>>,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            by_key: FxHashMap::default(),
            entity_index: FxHashMap::default(),
        }
    }

    /// Add a formula node. Returns its id; re-adding a key updates the
    /// existing node's formula and deps in place.
    pub fn add_node(
        &mut self,
        key: &str,
        sensor_id: &str,
        formula: &str,
        kind: NodeKind,
        deps: BTreeSet<Dependency>,
    ) -> NodeId {
        if let Some(&existing) = self.by_key.get(key) {
            let node = &mut self.nodes[existing.as_index()];
            node.formula = formula.to_string();
            node.deps = deps;
            node.kind = kind;
            return existing;
        }

        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(DependencyNode {
            key: key.to_string(),
            sensor_id: sensor_id.to_string(),
            formula: formula.to_string(),
            kind,
            deps,
            dependencies: Vec::new(),
            dependents: Vec::new(),
            seq: id.0,
        });
        self.by_key.insert(key.to_string(), id);
        id
    }

    /// Wire edges and the entity index from the recorded dep sets. Called
    /// once after all nodes are added.
    pub fn link(&mut self) {
        for id in (0..self.nodes.len() as u32).map(NodeId::new) {
            let (sensor_id, kind, deps) = {
                let node = &self.nodes[id.as_index()];
                (node.sensor_id.clone(), node.kind, node.deps.clone())
            };

            for dep in &deps {
                match dep.kind {
                    DependencyKind::State if kind == NodeKind::Attribute => {
                        // Attribute formulas see the same-cycle main result.
                        if let Some(&main) = self.by_key.get(&sensor_id) {
                            self.add_edge(id, main);
                        }
                    }
                    DependencyKind::Attribute => {
                        let attr_key = format!("{}_{}", sensor_id, dep.identifier);
                        if let Some(&other) = self.by_key.get(&attr_key) {
                            self.add_edge(id, other);
                        }
                    }
                    DependencyKind::CrossSensor => {
                        let target = match self.by_key.get(&dep.identifier) {
                            Some(&t) => t,
                            None => self.add_node(
                                &dep.identifier,
                                &dep.identifier,
                                "",
                                NodeKind::CrossSensor,
                                BTreeSet::new(),
                            ),
                        };
                        // Self-reference inside an attribute formula is
                        // rewritten to `state` at resolution; as a graph
                        // edge it is just the attribute-after-main rule.
                        if target != id {
                            self.add_edge(id, target);
                        }
                    }
                    DependencyKind::Entity => {
                        self.entity_index
                            .entry(dep.identifier.clone())
                            .or_default()
                            .insert(id);
                    }
                    _ => {}
                }
            }
        }
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId) {
        let node = &mut self.nodes[from.as_index()];
        if !node.dependencies.contains(&to) {
            node.dependencies.push(to);
        }
        let target = &mut self.nodes[to.as_index()];
        if !target.dependents.contains(&from) {
            target.dependents.push(from);
        }
    }

    pub fn node(&self, id: NodeId) -> &DependencyNode {
        &self.nodes[id.as_index()]
    }

    pub fn node_by_key(&self, key: &str) -> Option<NodeId> {
        self.by_key.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId::new)
    }

    pub fn sensor_nodes(&self, sensor_id: &str) -> Vec<NodeId> {
        self.node_ids()
            .filter(|id| self.node(*id).sensor_id == sensor_id)
            .collect()
    }

    /// Sensors whose formulas read any of the given entities, including
    /// sensors reached transitively through cross-sensor edges.
    pub fn sensors_affected_by(&self, entities: &BTreeSet<String>) -> BTreeSet<String> {
        let mut affected = FxHashSet::default();
        let mut to_visit: Vec<NodeId> = entities
            .iter()
            .filter_map(|e| self.entity_index.get(e))
            .flatten()
            .copied()
            .collect();

        while let Some(id) = to_visit.pop() {
            if !affected.insert(id) {
                continue;
            }
            to_visit.extend(&self.nodes[id.as_index()].dependents);
        }

        affected
            .into_iter()
            .map(|id| self.node(id).sensor_id.clone())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn nodes(&self) -> &[DependencyNode] {
        &self.nodes
    }
}

/// Build the full graph for a config whose per-formula dep sets have been
/// extracted. `deps_per_formula` is keyed the same way as node keys.
pub fn build_graph(
    config: &crate::config::Config,
    deps_per_formula: &FxHashMap<String, BTreeSet<Dependency>>,
) -> DependencyGraph {
    let mut graph = DependencyGraph::new();

    for sensor in &config.sensors {
        let main = sensor.main_formula();
        let key = sensor.unique_id.clone();
        let deps = deps_per_formula.get(&key).cloned().unwrap_or_default();
        graph.add_node(&key, &sensor.unique_id, &main.formula, NodeKind::Main, deps);

        for attr in sensor.attribute_formulas() {
            let deps = deps_per_formula.get(&attr.id).cloned().unwrap_or_default();
            graph.add_node(
                &attr.id,
                &sensor.unique_id,
                &attr.formula,
                NodeKind::Attribute,
                deps,
            );
        }
    }

    graph.link();
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, SensorConfig};

    fn dep(id: &str, kind: DependencyKind) -> Dependency {
        Dependency::new(id, kind)
    }

    fn two_sensor_graph() -> DependencyGraph {
        // `total` reads sensor.meter and the other sensor `solar`;
        // its attribute `doubled` reads `state`.
        let config = Config::new()
            .with_sensor(SensorConfig::new("solar", "sensor.panel * 1.0"))
            .with_sensor(
                SensorConfig::new("total", "sensor.meter + solar").with_attribute("doubled", "state * 2"),
            );

        let mut deps = FxHashMap::default();
        deps.insert(
            "solar".to_string(),
            BTreeSet::from([dep("sensor.panel", DependencyKind::Entity)]),
        );
        deps.insert(
            "total".to_string(),
            BTreeSet::from([
                dep("sensor.meter", DependencyKind::Entity),
                dep("solar", DependencyKind::CrossSensor),
            ]),
        );
        deps.insert(
            "total_doubled".to_string(),
            BTreeSet::from([dep("state", DependencyKind::State)]),
        );
        build_graph(&config, &deps)
    }

    #[test]
    fn builds_nodes_and_edges() {
        let graph = two_sensor_graph();
        assert_eq!(graph.len(), 3);

        let total = graph.node_by_key("total").unwrap();
        let solar = graph.node_by_key("solar").unwrap();
        let doubled = graph.node_by_key("total_doubled").unwrap();

        assert!(graph.node(total).dependencies.contains(&solar));
        assert!(graph.node(doubled).dependencies.contains(&total));
        assert!(graph.node(solar).dependents.contains(&total));
    }

    #[test]
    fn entity_index_maps_changes_to_sensors() {
        let graph = two_sensor_graph();

        let affected = graph.sensors_affected_by(&BTreeSet::from(["sensor.panel".to_string()]));
        // A change to the panel invalidates solar and, transitively, total.
        assert_eq!(
            affected,
            BTreeSet::from(["solar".to_string(), "total".to_string()])
        );

        let affected = graph.sensors_affected_by(&BTreeSet::from(["sensor.meter".to_string()]));
        assert_eq!(affected, BTreeSet::from(["total".to_string()]));

        let affected = graph.sensors_affected_by(&BTreeSet::from(["sensor.unrelated".to_string()]));
        assert!(affected.is_empty());
    }

    #[test]
    fn unknown_cross_sensor_gets_stub_node() {
        let config = Config::new().with_sensor(SensorConfig::new("a", "ghost + 1"));
        let mut deps = FxHashMap::default();
        deps.insert(
            "a".to_string(),
            BTreeSet::from([dep("ghost", DependencyKind::CrossSensor)]),
        );
        let graph = build_graph(&config, &deps);
        let ghost = graph.node_by_key("ghost").unwrap();
        assert_eq!(graph.node(ghost).kind, NodeKind::CrossSensor);
    }
}
