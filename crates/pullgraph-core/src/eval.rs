//! Pull-based recomputation.
//!
//! [`Evaluator`] walks the dependency cone of a node on demand: a dirty node
//! first resolves its dirty input ports (recursively pulling each wired
//! peer's owning node up to date, then copying the peer value in), then runs
//! its kind's fold and writes the result to its output ports by direct field
//! assignment -- never through the value setter, which would re-dirty the
//! node being evaluated. Clean nodes are returned as-is, so repeated
//! evaluation without intervening mutation performs no recomputation.
//!
//! Container nodes recurse one level deeper: resolved boundary-input values
//! are pushed into the internally wired child ports (re-marking the
//! sub-graph dirty, then clearing the bridged port flags so a child never
//! pulls back out through the boundary), the children feeding the boundary
//! outputs are pulled, and their values are copied outward.
//!
//! Cyclic wiring is not rejected at connect time; the evaluator detects a
//! re-entrant pull via an in-flight set and reports
//! [`EvalError::CycleDetected`] instead of recursing forever. Chain depth is
//! bounded by [`EvalConfig::max_depth`].

use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, trace};

use crate::error::GraphError;
use crate::graph::DataflowGraph;
use crate::id::NodeId;
use crate::port::{Port, PortRef};

/// Errors raised during pull evaluation.
///
/// Every variant carries the offending node for precise diagnostics.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("node not found: NodeId({id})", id = id.0)]
    NodeNotFound { id: NodeId },

    /// The node has no output port to receive its result.
    #[error("node {node} has no output port {port}")]
    MissingPort { node: NodeId, port: u16 },

    /// An output boundary port has no internal wiring to pull from.
    #[error("output boundary port {port} of container {node} has no internal wiring")]
    UnwiredBoundary { node: NodeId, port: u16 },

    /// The pull re-entered a node that is already being evaluated.
    #[error("dependency cycle detected while pulling node {node}")]
    CycleDetected { node: NodeId },

    #[error("evaluation depth limit ({limit}) exceeded at node {node}")]
    DepthLimitExceeded { node: NodeId, limit: usize },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Evaluator configuration.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Whether to record a [`TraceEntry`] per recomputed node.
    pub trace_enabled: bool,
    /// Maximum pull depth (longest dependency chain). Default: 256.
    pub max_depth: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            trace_enabled: false,
            max_depth: 256,
        }
    }
}

/// One recorded recomputation. Cache hits (clean nodes) record nothing.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    /// The node that was recomputed.
    pub node: NodeId,
    /// Kind tag plus display label, e.g. `Sum 'totals'`.
    pub op: String,
    /// Resolved input values, in port order.
    pub inputs: Vec<f64>,
    /// Output values written, in port order.
    pub outputs: Vec<f64>,
}

/// The pull evaluator. Borrows the graph mutably for the duration of a run;
/// construct one per evaluation wave.
pub struct Evaluator<'g> {
    graph: &'g mut DataflowGraph,
    config: EvalConfig,
    /// Nodes currently being pulled, for cycle detection.
    in_flight: HashSet<NodeId>,
    trace: Option<Vec<TraceEntry>>,
}

impl<'g> Evaluator<'g> {
    pub fn new(graph: &'g mut DataflowGraph, config: EvalConfig) -> Self {
        let trace = config.trace_enabled.then(Vec::new);
        Evaluator {
            graph,
            config,
            in_flight: HashSet::new(),
            trace,
        }
    }

    /// Pulls a node up to date. A no-op when the node is clean.
    pub fn evaluate(&mut self, node: NodeId) -> Result<(), EvalError> {
        self.pull(node, 0)
    }

    /// The recomputations recorded so far, oldest first. Empty unless
    /// [`EvalConfig::trace_enabled`] was set.
    pub fn trace(&self) -> &[TraceEntry] {
        self.trace.as_deref().unwrap_or_default()
    }

    fn pull(&mut self, id: NodeId, depth: usize) -> Result<(), EvalError> {
        let data = self.graph.node(id).ok_or(EvalError::NodeNotFound { id })?;
        if !data.is_dirty() {
            trace!(node = %id, "clean, serving cached outputs");
            return Ok(());
        }
        if depth >= self.config.max_depth {
            return Err(EvalError::DepthLimitExceeded {
                node: id,
                limit: self.config.max_depth,
            });
        }
        if !self.in_flight.insert(id) {
            return Err(EvalError::CycleDetected { node: id });
        }
        let result = self.recompute(id, depth);
        self.in_flight.remove(&id);
        result
    }

    /// For every dirty input port: pull the wired peer's owning node up to
    /// date and copy its value in, then clear the port's dirty flag whether
    /// or not it was connected. Disconnected dirty ports keep their current
    /// value.
    fn resolve_inputs(&mut self, id: NodeId, depth: usize) -> Result<(), EvalError> {
        let count = self
            .graph
            .node(id)
            .ok_or(EvalError::NodeNotFound { id })?
            .input_count();
        for i in 0..count {
            let port = PortRef::input(id, i as u16);
            if !self.graph.port(port)?.is_dirty() {
                continue;
            }
            if let Some(peer) = self.graph.provider(port) {
                trace!(from = %peer, to = %port, "pulling input");
                self.pull(peer.node, depth + 1)?;
                let value = self.graph.value(peer)?;
                let p = self.graph.port_mut(port)?;
                p.value = value;
                p.dirty = false;
            } else {
                self.graph.port_mut(port)?.dirty = false;
            }
        }
        Ok(())
    }

    fn recompute(&mut self, id: NodeId, depth: usize) -> Result<(), EvalError> {
        self.resolve_inputs(id, depth)?;

        let (kind, values) = {
            let data = self.graph.node(id).ok_or(EvalError::NodeNotFound { id })?;
            let values: Vec<f64> = data.inputs().iter().map(Port::value).collect();
            (data.kind, values)
        };

        match kind.fold(&values) {
            None => self.recompute_container(id, depth),
            Some(result) => {
                let data = self
                    .graph
                    .node_mut(id)
                    .ok_or(EvalError::NodeNotFound { id })?;
                let Some(out) = data.port_mut(PortRef::output(id, 0).slot()) else {
                    return Err(EvalError::MissingPort { node: id, port: 0 });
                };
                out.value = result;
                data.dirty = false;
                debug!(node = %id, result, "recomputed");
                self.record(id, values, vec![result]);
                Ok(())
            }
        }
    }

    /// The container protocol: push resolved boundary inputs into the
    /// sub-graph, pull the children wired to the boundary outputs, copy
    /// their values outward.
    fn recompute_container(&mut self, id: NodeId, depth: usize) -> Result<(), EvalError> {
        let (in_count, out_count) = {
            let data = self.graph.node(id).ok_or(EvalError::NodeNotFound { id })?;
            (data.input_count(), data.output_count())
        };

        let mut pushed = Vec::with_capacity(in_count);
        for i in 0..in_count {
            let boundary = PortRef::input(id, i as u16);
            let value = self.graph.value(boundary)?;
            for target in self.graph.internal_peers(boundary) {
                trace!(from = %boundary, to = %target, value, "pushing into sub-graph");
                self.graph.port_mut(target)?.value = value;
                // Re-dirty the child so the sub-graph recomputes, then clear
                // the bridged port so the child does not pull back out
                // through the boundary.
                self.graph.mark_dirty(target.node)?;
                self.graph.port_mut(target)?.dirty = false;
            }
            self.graph.port_mut(boundary)?.dirty = false;
            pushed.push(value);
        }

        let mut copied_out = Vec::with_capacity(out_count);
        for i in 0..out_count {
            let boundary = PortRef::output(id, i as u16);
            let Some(feeder) = self.graph.internal_peers(boundary).first().copied() else {
                return Err(EvalError::UnwiredBoundary {
                    node: id,
                    port: i as u16,
                });
            };
            self.pull(feeder.node, depth + 1)?;
            let value = self.graph.value(feeder)?;
            self.graph.port_mut(boundary)?.value = value;
            copied_out.push(value);
        }

        let data = self
            .graph
            .node_mut(id)
            .ok_or(EvalError::NodeNotFound { id })?;
        data.dirty = false;
        debug!(node = %id, "container recomputed");
        self.record(id, pushed, copied_out);
        Ok(())
    }

    fn record(&mut self, id: NodeId, inputs: Vec<f64>, outputs: Vec<f64>) {
        let Some(entries) = self.trace.as_mut() else {
            return;
        };
        let op = match self.graph.node(id) {
            Some(data) => format!("{} '{}'", data.kind.name(), data.label),
            None => String::from("?"),
        };
        entries.push(TraceEntry {
            node: id,
            op,
            inputs,
            outputs,
        });
    }
}

impl DataflowGraph {
    /// Pulls one node up to date with the default evaluator configuration.
    pub fn evaluate(&mut self, node: NodeId) -> Result<(), EvalError> {
        Evaluator::new(self, EvalConfig::default()).evaluate(node)
    }

    /// Whole-graph evaluation: pulls every network head. Every top-level
    /// node is upstream of some head (nodes without connected outputs are
    /// their own heads), so this reaches the entire graph while skipping
    /// clean regions.
    pub fn evaluate_all(&mut self) -> Result<(), EvalError> {
        let heads = self.network_heads();
        let mut evaluator = Evaluator::new(self, EvalConfig::default());
        for head in heads {
            evaluator.evaluate(head)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::NodeKind;

    fn out(graph: &DataflowGraph, node: NodeId) -> PortRef {
        graph.output_port(node, "result").unwrap()
    }

    fn input(graph: &DataflowGraph, node: NodeId, name: &str) -> PortRef {
        graph.input_port(node, name).unwrap()
    }

    #[test]
    fn evaluate_clears_dirt_and_writes_result() {
        let mut graph = DataflowGraph::new();
        let sum = graph.create_node(NodeKind::Sum);
        graph.set_value(input(&graph, sum, "value1"), 2.0).unwrap();
        graph.set_value(input(&graph, sum, "value2"), 3.0).unwrap();

        graph.evaluate(sum).unwrap();

        assert!(!graph.is_dirty(sum));
        assert_eq!(graph.value(out(&graph, sum)).unwrap(), 5.0);
        assert!(!graph.port(input(&graph, sum, "value1")).unwrap().is_dirty());
    }

    #[test]
    fn evaluating_a_clean_node_is_a_no_op() {
        let mut graph = DataflowGraph::new();
        let sum = graph.create_node(NodeKind::Sum);
        graph.set_value(input(&graph, sum, "value1"), 2.0).unwrap();
        graph.evaluate(sum).unwrap();
        let first = graph.value(out(&graph, sum)).unwrap();

        graph.evaluate(sum).unwrap();

        assert_eq!(graph.value(out(&graph, sum)).unwrap(), first);
        assert!(!graph.is_dirty(sum));
    }

    #[test]
    fn pull_recomputes_only_the_dirty_cone() {
        let mut graph = DataflowGraph::new();
        let a = graph.create_node(NodeKind::Sum);
        let b = graph.create_node(NodeKind::Sum);
        graph.connect(out(&graph, a), input(&graph, b, "value1")).unwrap();
        graph.set_value(input(&graph, a, "value1"), 1.0).unwrap();
        graph.set_value(input(&graph, b, "value2"), 10.0).unwrap();
        graph.evaluate(b).unwrap();
        assert_eq!(graph.value(out(&graph, b)).unwrap(), 11.0);

        // Nothing changed: a traced run records no recomputation at all.
        let mut evaluator = Evaluator::new(
            &mut graph,
            EvalConfig {
                trace_enabled: true,
                ..EvalConfig::default()
            },
        );
        evaluator.evaluate(b).unwrap();
        assert!(evaluator.trace().is_empty());
    }

    #[test]
    fn trace_records_recomputations_in_pull_order() {
        let mut graph = DataflowGraph::new();
        let a = graph.create_node(NodeKind::Sum);
        let b = graph.create_node(NodeKind::Negate);
        graph.connect(out(&graph, a), input(&graph, b, "value")).unwrap();
        graph.set_value(input(&graph, a, "value1"), 4.0).unwrap();

        let mut evaluator = Evaluator::new(
            &mut graph,
            EvalConfig {
                trace_enabled: true,
                ..EvalConfig::default()
            },
        );
        evaluator.evaluate(b).unwrap();

        let trace = evaluator.trace();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[0].node, a);
        assert_eq!(trace[0].outputs, vec![4.0]);
        assert_eq!(trace[1].node, b);
        assert_eq!(trace[1].outputs, vec![-4.0]);
        assert!(trace[1].op.starts_with("Negate"));
    }

    #[test]
    fn unwired_boundary_output_is_an_error() {
        let mut graph = DataflowGraph::new();
        let container = graph.create_node(NodeKind::Container);
        graph.add_input_port(container, "value", 0.0).unwrap();
        graph.add_output_port(container, "result").unwrap();

        let err = graph.evaluate(container).unwrap_err();
        assert!(matches!(err, EvalError::UnwiredBoundary { node, port: 0 } if node == container));
    }

    #[test]
    fn self_loop_reports_a_cycle() {
        let mut graph = DataflowGraph::new();
        let sum = graph.create_node(NodeKind::Sum);
        graph.connect(out(&graph, sum), input(&graph, sum, "value1")).unwrap();

        let err = graph.evaluate(sum).unwrap_err();
        assert!(matches!(err, EvalError::CycleDetected { .. }));
    }

    #[test]
    fn two_node_cycle_reports_a_cycle() {
        let mut graph = DataflowGraph::new();
        let a = graph.create_node(NodeKind::Sum);
        let b = graph.create_node(NodeKind::Sum);
        graph.connect(out(&graph, a), input(&graph, b, "value1")).unwrap();
        graph.connect(out(&graph, b), input(&graph, a, "value1")).unwrap();

        let err = graph.evaluate(a).unwrap_err();
        assert!(matches!(err, EvalError::CycleDetected { .. }));
    }

    #[test]
    fn depth_limit_bounds_long_chains() {
        let mut graph = DataflowGraph::new();
        let mut prev = graph.create_node(NodeKind::Negate);
        graph.set_value(input(&graph, prev, "value"), 1.0).unwrap();
        for _ in 0..8 {
            let next = graph.create_node(NodeKind::Negate);
            graph.connect(out(&graph, prev), input(&graph, next, "value")).unwrap();
            prev = next;
        }

        let mut evaluator = Evaluator::new(
            &mut graph,
            EvalConfig {
                trace_enabled: false,
                max_depth: 4,
            },
        );
        let err = evaluator.evaluate(prev).unwrap_err();
        assert!(matches!(err, EvalError::DepthLimitExceeded { limit: 4, .. }));
    }

    #[test]
    fn evaluate_all_reaches_every_island() {
        let mut graph = DataflowGraph::new();
        let chained = graph.create_node(NodeKind::Sum);
        let negate = graph.create_node(NodeKind::Negate);
        graph.connect(out(&graph, chained), input(&graph, negate, "value")).unwrap();
        let island = graph.create_node(NodeKind::Multiply);

        graph.set_value(input(&graph, chained, "value1"), 2.0).unwrap();
        graph.set_value(input(&graph, island, "value1"), 3.0).unwrap();
        graph.set_value(input(&graph, island, "value2"), 4.0).unwrap();

        graph.evaluate_all().unwrap();

        assert_eq!(graph.value(out(&graph, negate)).unwrap(), -2.0);
        assert_eq!(graph.value(out(&graph, island)).unwrap(), 12.0);
        assert!(!graph.is_dirty(chained));
        assert!(!graph.is_dirty(island));
    }
}
