//! Topological scheduling over the dependency graph.
//!
//! Kahn's algorithm with a deterministic tie-break: among ready nodes the
//! lowest build sequence wins, which encodes the required ordering —
//! dependencies before dependents, main before attributes within a sensor,
//! attributes in source order.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

use rustc_hash::{FxHashMap, FxHashSet};
use synsor_common::{EngineError, EngineErrorExtra, EngineErrorKind};

use super::graph::{DependencyGraph, NodeId};

pub struct Scheduler<'a> {
    graph: &'a DependencyGraph,
}

impl<'a> Scheduler<'a> {
    pub fn new(graph: &'a DependencyGraph) -> Self {
        Self { graph }
    }

    /// Topological order over the whole graph. Used at load to surface
    /// cycles before anything is evaluated.
    pub fn full_order(&self) -> Result<Vec<NodeId>, EngineError> {
        self.order_subset(&self.graph.node_ids().collect::<Vec<_>>())
    }

    /// Evaluation order for one sensor's formulas: main first, then
    /// attributes in dependency-then-source order. Cross-sensor edges are
    /// outside the subset and therefore presumed already satisfied by the
    /// driver's sensor ordering.
    pub fn evaluation_order(&self, sensor_id: &str) -> Result<Vec<NodeId>, EngineError> {
        self.order_subset(&self.graph.sensor_nodes(sensor_id))
    }

    /// Sensor-level order for a full driver pass: a sensor referenced by
    /// another is evaluated first.
    pub fn cross_sensor_order(&self) -> Result<Vec<String>, EngineError> {
        let order = self.full_order()?;
        let mut sensors = Vec::new();
        let mut seen = FxHashSet::default();
        for id in order {
            let sensor = &self.graph.node(id).sensor_id;
            if seen.insert(sensor.clone()) {
                sensors.push(sensor.clone());
            }
        }
        Ok(sensors)
    }

    /// The node ids a formula depends on (direct edges only).
    pub fn dependencies_of(&self, id: NodeId) -> &[NodeId] {
        &self.graph.node(id).dependencies
    }

    fn order_subset(&self, subset: &[NodeId]) -> Result<Vec<NodeId>, EngineError> {
        let members: FxHashSet<NodeId> = subset.iter().copied().collect();

        // In-degree restricted to the subset.
        let mut indegree: FxHashMap<NodeId, usize> = FxHashMap::default();
        for &id in subset {
            let within = self
                .graph
                .node(id)
                .dependencies
                .iter()
                .filter(|d| members.contains(d))
                .count();
            indegree.insert(id, within);
        }

        let mut ready: BinaryHeap<Reverse<(u32, NodeId)>> = indegree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(&id, _)| Reverse((self.graph.node(id).seq, id)))
            .collect();

        let mut order = Vec::with_capacity(subset.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            order.push(id);
            for &dependent in &self.graph.node(id).dependents {
                if let Some(deg) = indegree.get_mut(&dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(Reverse((self.graph.node(dependent).seq, dependent)));
                    }
                }
            }
        }

        if order.len() < subset.len() {
            let remaining: BTreeSet<NodeId> = members
                .iter()
                .filter(|id| !order.contains(id))
                .copied()
                .collect();
            let path = self.cycle_path(&remaining);
            return Err(EngineError::new(EngineErrorKind::Circular)
                .with_message("evaluation order contains a cycle")
                .with_extra(EngineErrorExtra::CyclePath(path)));
        }

        Ok(order)
    }

    /// Walk dependency edges among the unprocessed nodes until one repeats,
    /// then report the loop with the repeated node at both ends.
    fn cycle_path(&self, remaining: &BTreeSet<NodeId>) -> Vec<String> {
        let Some(&start) = remaining.iter().next() else {
            return Vec::new();
        };

        let mut path: Vec<NodeId> = Vec::new();
        let mut seen: FxHashMap<NodeId, usize> = FxHashMap::default();
        let mut current = start;
        loop {
            if let Some(&at) = seen.get(&current) {
                let mut cycle: Vec<String> = path[at..]
                    .iter()
                    .map(|id| self.graph.node(*id).key.clone())
                    .collect();
                cycle.push(self.graph.node(current).key.clone());
                return cycle;
            }
            seen.insert(current, path.len());
            path.push(current);

            // Every remaining node has at least one remaining dependency,
            // otherwise Kahn would have drained it.
            current = match self
                .graph
                .node(current)
                .dependencies
                .iter()
                .find(|d| remaining.contains(d))
            {
                Some(&next) => next,
                None => return path.iter().map(|id| self.graph.node(*id).key.clone()).collect(),
            };
        }
    }
}
