//! DataflowGraph: the arena container and single mutation entry point.
//!
//! All nodes live in one flat `StableGraph`, with container membership
//! expressed as ownership metadata on the node weights. An edge between a
//! container's boundary port and one of its children is *internal* from the
//! container's perspective (wiring, not an external dependency) and an
//! ordinary peer from the child's perspective; the classification is derived
//! from the ownership field rather than stored twice.
//!
//! All mutations go through `DataflowGraph` methods. The forward dirty
//! cascade is the explicit [`DataflowGraph::mark_dirty`] function invoked
//! from the `set_value`, `connect` and `disconnect` call sites, so the
//! invalidation control flow is visible and testable on its own.

use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use tracing::{debug, trace};

use crate::edge::Wire;
use crate::error::GraphError;
use crate::id::{EdgeId, NodeId};
use crate::kind::NodeKind;
use crate::node::NodeData;
use crate::port::{Port, PortDir, PortRef, PortSlot};

/// How two ports relate across the container hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WiringShape {
    /// Ordinary wiring between nodes in the same scope: `out -> in`.
    Sibling,
    /// Container boundary input into one of its children: `in -> in`.
    BoundaryPush,
    /// Child output up to the container's boundary output: `out -> out`.
    BoundaryLift,
}

/// The flat owner of all nodes and wires.
pub struct DataflowGraph {
    arena: StableGraph<NodeData, Wire, Directed, u32>,
    /// Insertion-ordered collection of nodes not owned by any container.
    /// This is the node collection the topology queries classify.
    top_level: Vec<NodeId>,
    next_runtime_id: u32,
}

impl DataflowGraph {
    pub fn new() -> Self {
        DataflowGraph {
            arena: StableGraph::new(),
            top_level: Vec::new(),
            next_runtime_id: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Factory and accessors
    // -----------------------------------------------------------------------

    /// Instantiates a node of the requested kind at the top level and
    /// returns its ID.
    pub fn create_node(&mut self, kind: NodeKind) -> NodeId {
        let data = NodeData::new(kind, self.take_runtime_id());
        let id = NodeId::from(self.arena.add_node(data));
        self.top_level.push(id);
        debug!(node = %id, kind = kind.name(), "created node");
        id
    }

    fn take_runtime_id(&mut self) -> u32 {
        let id = self.next_runtime_id;
        self.next_runtime_id += 1;
        id
    }

    /// Looks up a node by ID.
    pub fn node(&self, id: NodeId) -> Option<&NodeData> {
        self.arena.node_weight(id.into())
    }

    /// Looks up a node by ID, mutably (e.g. to edit its display label).
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.arena.node_weight_mut(id.into())
    }

    fn node_ref(&self, id: NodeId) -> Result<&NodeData, GraphError> {
        self.arena
            .node_weight(id.into())
            .ok_or(GraphError::NodeNotFound { id })
    }

    fn node_ref_mut(&mut self, id: NodeId) -> Result<&mut NodeData, GraphError> {
        self.arena
            .node_weight_mut(id.into())
            .ok_or(GraphError::NodeNotFound { id })
    }

    /// Total node count, including container-internal nodes.
    pub fn node_count(&self) -> usize {
        self.arena.node_count()
    }

    /// Total wire count across all scopes.
    pub fn edge_count(&self) -> usize {
        self.arena.edge_count()
    }

    /// The top-level node collection, in creation order.
    pub fn top_level_nodes(&self) -> &[NodeId] {
        &self.top_level
    }

    // -----------------------------------------------------------------------
    // Container membership
    // -----------------------------------------------------------------------

    /// Instantiates a node of the requested kind directly inside a
    /// container's internal collection.
    pub fn create_child(
        &mut self,
        container: NodeId,
        kind: NodeKind,
    ) -> Result<NodeId, GraphError> {
        if !self.node_ref(container)?.is_container() {
            return Err(GraphError::NotAContainer { id: container });
        }
        let mut data = NodeData::new(kind, self.take_runtime_id());
        data.parent = Some(container);
        let id = NodeId::from(self.arena.add_node(data));
        if let Some(c) = self.arena.node_weight_mut(container.into()) {
            c.children.push(id);
        }
        debug!(node = %id, container = %container, "created child node");
        Ok(id)
    }

    /// Moves an existing top-level node into a container's internal
    /// collection.
    pub fn adopt_child(&mut self, container: NodeId, node: NodeId) -> Result<(), GraphError> {
        if !self.node_ref(container)?.is_container() {
            return Err(GraphError::NotAContainer { id: container });
        }
        if self.node_ref(node)?.parent.is_some() {
            return Err(GraphError::AlreadyOwned { id: node });
        }
        self.top_level.retain(|&n| n != node);
        self.node_ref_mut(node)?.parent = Some(container);
        self.node_ref_mut(container)?.children.push(node);
        Ok(())
    }

    /// Detaches a node from a container's internal collection, returning it
    /// to the top level. Edges still referencing the node are left in place
    /// (they re-classify as external); severing them is the caller's
    /// responsibility.
    pub fn remove_child(&mut self, container: NodeId, node: NodeId) -> Result<(), GraphError> {
        if !self.node_ref(container)?.is_container() {
            return Err(GraphError::NotAContainer { id: container });
        }
        if self.node_ref(node)?.parent != Some(container) {
            return Err(GraphError::NotAChild { id: node });
        }
        self.node_ref_mut(node)?.parent = None;
        self.node_ref_mut(container)?.children.retain(|&n| n != node);
        self.top_level.push(node);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Ports
    // -----------------------------------------------------------------------

    /// Appends a new input port to a node. Callable both right after
    /// construction and later (dynamic arity).
    pub fn add_input_port(
        &mut self,
        node: NodeId,
        name: &str,
        default: f64,
    ) -> Result<PortRef, GraphError> {
        let index = self.node_ref_mut(node)?.add_input(name, default);
        Ok(PortRef::input(node, index))
    }

    /// Appends a new output port to a node.
    pub fn add_output_port(&mut self, node: NodeId, name: &str) -> Result<PortRef, GraphError> {
        let index = self.node_ref_mut(node)?.add_output(name);
        Ok(PortRef::output(node, index))
    }

    /// Linear name lookup in the node's input list. `None` when absent so
    /// callers can branch on the miss.
    pub fn input_port(&self, node: NodeId, name: &str) -> Option<PortRef> {
        self.node(node)?
            .input_index(name)
            .map(|i| PortRef::input(node, i))
    }

    /// Linear name lookup in the node's output list.
    pub fn output_port(&self, node: NodeId, name: &str) -> Option<PortRef> {
        self.node(node)?
            .output_index(name)
            .map(|i| PortRef::output(node, i))
    }

    /// Resolves a port reference to the port data.
    pub fn port(&self, port: PortRef) -> Result<&Port, GraphError> {
        self.node_ref(port.node)?
            .port(port.slot())
            .ok_or(GraphError::PortOutOfRange { port })
    }

    pub(crate) fn port_mut(&mut self, port: PortRef) -> Result<&mut Port, GraphError> {
        self.arena
            .node_weight_mut(port.node.into())
            .ok_or(GraphError::NodeNotFound { id: port.node })?
            .port_mut(port.slot())
            .ok_or(GraphError::PortOutOfRange { port })
    }

    fn check_port(&self, port: PortRef) -> Result<(), GraphError> {
        self.port(port).map(|_| ())
    }

    /// Reads a port's cached value.
    pub fn value(&self, port: PortRef) -> Result<f64, GraphError> {
        Ok(self.port(port)?.value())
    }

    /// Stores a value, marks the port dirty, and cascades the owning node's
    /// dirty flag downstream.
    pub fn set_value(&mut self, port: PortRef, value: f64) -> Result<(), GraphError> {
        {
            let p = self.port_mut(port)?;
            p.value = value;
            p.dirty = true;
        }
        debug!(port = %port, value, "set value");
        self.mark_dirty(port.node)
    }

    // -----------------------------------------------------------------------
    // Peer queries
    // -----------------------------------------------------------------------

    /// All wires touching a port slot, with the opposite endpoint of each.
    fn incident(&self, port: PortRef) -> Vec<(EdgeId, PortRef)> {
        let idx: NodeIndex<u32> = port.node.into();
        let slot = port.slot();
        let mut found = Vec::new();
        for e in self.arena.edges_directed(idx, Direction::Outgoing) {
            let w = e.weight();
            if w.source == slot {
                found.push((
                    EdgeId::from(e.id()),
                    PortRef {
                        node: NodeId::from(e.target()),
                        dir: w.target.dir,
                        index: w.target.index,
                    },
                ));
            }
        }
        for e in self.arena.edges_directed(idx, Direction::Incoming) {
            let w = e.weight();
            if w.target == slot {
                found.push((
                    EdgeId::from(e.id()),
                    PortRef {
                        node: NodeId::from(e.source()),
                        dir: w.source.dir,
                        index: w.source.index,
                    },
                ));
            }
        }
        found
    }

    /// A wire is internal *from this port's perspective* when the opposite
    /// endpoint belongs to a node inside this port's own container node.
    fn is_internal_for(&self, port: PortRef, other: PortRef) -> bool {
        self.arena
            .node_weight(other.node.into())
            .is_some_and(|n| n.parent == Some(port.node))
    }

    /// The port's external peer set: every port it is wired to, excluding a
    /// container boundary port's internal wiring. Reciprocal by
    /// construction: each wire is a single arena edge visible from both of
    /// its endpoints.
    pub fn peers(&self, port: PortRef) -> Vec<PortRef> {
        self.incident(port)
            .into_iter()
            .filter(|&(_, other)| !self.is_internal_for(port, other))
            .map(|(_, other)| other)
            .collect()
    }

    /// A container boundary port's internal wiring: the child ports it
    /// bridges to. Empty for ports of non-container nodes.
    pub fn internal_peers(&self, port: PortRef) -> Vec<PortRef> {
        self.incident(port)
            .into_iter()
            .filter(|&(_, other)| self.is_internal_for(port, other))
            .map(|(_, other)| other)
            .collect()
    }

    /// The single external wire feeding this input port, if any.
    pub fn provider(&self, port: PortRef) -> Option<PortRef> {
        let idx: NodeIndex<u32> = port.node.into();
        for e in self.arena.edges_directed(idx, Direction::Incoming) {
            let w = e.weight();
            if w.target == port.slot() {
                let other = PortRef {
                    node: NodeId::from(e.source()),
                    dir: w.source.dir,
                    index: w.source.index,
                };
                if !self.is_internal_for(port, other) {
                    return Some(other);
                }
            }
        }
        None
    }

    /// True iff the external peer set is non-empty.
    pub fn is_port_connected(&self, port: PortRef) -> bool {
        !self.peers(port).is_empty()
    }

    /// True iff any of the node's ports has an external peer.
    pub fn is_node_connected(&self, node: NodeId) -> bool {
        self.has_connected_input(node) || self.has_connected_output(node)
    }

    // -----------------------------------------------------------------------
    // Wiring
    // -----------------------------------------------------------------------

    fn classify_wiring(
        &self,
        source: PortRef,
        target: PortRef,
    ) -> Result<WiringShape, GraphError> {
        let source_parent = self.node_ref(source.node)?.parent;
        let target_parent = self.node_ref(target.node)?.parent;

        let (shape, roles_ok) = if target_parent == Some(source.node) {
            (
                WiringShape::BoundaryPush,
                source.dir == PortDir::In && target.dir == PortDir::In,
            )
        } else if source_parent == Some(target.node) {
            (
                WiringShape::BoundaryLift,
                source.dir == PortDir::Out && target.dir == PortDir::Out,
            )
        } else if source_parent == target_parent {
            (
                WiringShape::Sibling,
                source.dir == PortDir::Out && target.dir == PortDir::In,
            )
        } else {
            return Err(GraphError::InvalidWire {
                reason: format!("ports {source} and {target} are in unrelated scopes"),
            });
        };

        if !roles_ok {
            return Err(GraphError::InvalidWire {
                reason: format!("wrong port roles for {source} -> {target}"),
            });
        }
        Ok(shape)
    }

    /// Wires `source` to `target` (data flow direction).
    ///
    /// Fails with [`GraphError::PortOccupied`] -- leaving the graph
    /// untouched -- when the target port already has a peer in the realm of
    /// the new wire; the check inspects only the target port, so one source
    /// may fan out to several distinct targets while each target accepts at
    /// most one inbound wire.
    ///
    /// Wiring a container boundary port to one of its own children records
    /// internal wiring: the child side is invalidated, but the container
    /// itself is not dirtied (it gained wiring, not an external dependency).
    pub fn connect(&mut self, source: PortRef, target: PortRef) -> Result<EdgeId, GraphError> {
        self.check_port(source)?;
        self.check_port(target)?;
        let shape = self.classify_wiring(source, target)?;

        let occupied = match shape {
            WiringShape::Sibling | WiringShape::BoundaryPush => !self.peers(target).is_empty(),
            WiringShape::BoundaryLift => !self.internal_peers(target).is_empty(),
        };
        if occupied {
            return Err(GraphError::PortOccupied { port: target });
        }

        let edge = self.arena.add_edge(
            source.node.into(),
            target.node.into(),
            Wire {
                source: source.slot(),
                target: target.slot(),
            },
        );

        match shape {
            WiringShape::Sibling => {
                self.port_mut(target)?.dirty = true;
                self.mark_dirty(target.node)?;
                self.port_mut(source)?.dirty = true;
                self.mark_dirty(source.node)?;
            }
            // Internal wiring invalidates the child side only.
            WiringShape::BoundaryPush => {
                self.port_mut(target)?.dirty = true;
                self.mark_dirty(target.node)?;
            }
            WiringShape::BoundaryLift => {
                self.port_mut(source)?.dirty = true;
                self.mark_dirty(source.node)?;
            }
        }

        debug!(source = %source, target = %target, "connected");
        Ok(EdgeId::from(edge))
    }

    fn find_wire(&self, a: PortRef, b: PortRef) -> Option<EdgeId> {
        let a_idx: NodeIndex<u32> = a.node.into();
        let b_idx: NodeIndex<u32> = b.node.into();
        for e in self.arena.edges_directed(a_idx, Direction::Outgoing) {
            if e.target() == b_idx && e.weight().source == a.slot() && e.weight().target == b.slot()
            {
                return Some(EdgeId::from(e.id()));
            }
        }
        for e in self.arena.edges_directed(a_idx, Direction::Incoming) {
            if e.source() == b_idx && e.weight().source == b.slot() && e.weight().target == a.slot()
            {
                return Some(EdgeId::from(e.id()));
            }
        }
        None
    }

    /// Removes the single reciprocal wire between two ports, marking both
    /// former endpoints (and their nodes) dirty. A no-op when the ports are
    /// not wired. Neither port's cached value is reset.
    pub fn disconnect(&mut self, a: PortRef, b: PortRef) -> Result<(), GraphError> {
        self.check_port(a)?;
        self.check_port(b)?;
        let Some(edge) = self.find_wire(a, b) else {
            return Ok(());
        };
        self.arena.remove_edge(edge.into());
        for port in [a, b] {
            self.port_mut(port)?.dirty = true;
            self.mark_dirty(port.node)?;
        }
        debug!(a = %a, b = %b, "disconnected");
        Ok(())
    }

    /// Dissolves every wire in the port's external peer set, marking each
    /// former peer dirty. A container boundary port's internal wiring is not
    /// part of its peer set and survives.
    pub fn disconnect_all(&mut self, port: PortRef) -> Result<(), GraphError> {
        self.check_port(port)?;
        let wires: Vec<(EdgeId, PortRef)> = self
            .incident(port)
            .into_iter()
            .filter(|&(_, other)| !self.is_internal_for(port, other))
            .collect();
        for (edge, other) in wires {
            self.arena.remove_edge(edge.into());
            self.port_mut(other)?.dirty = true;
            self.mark_dirty(other.node)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Dirty propagation
    // -----------------------------------------------------------------------

    /// Marks a node dirty and cascades forward: every port this node's
    /// output ports are wired to is marked dirty, recursively through their
    /// owning nodes. Runs on a worklist rather than the call stack.
    ///
    /// An already-dirty node is skipped, which bounds re-propagation over
    /// wide fan-outs; the cascade re-runs the next time the node transitions
    /// from clean to dirty.
    pub fn mark_dirty(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.node_ref(id)?;
        let mut work = vec![id];
        while let Some(current) = work.pop() {
            let idx: NodeIndex<u32> = current.into();
            {
                let Some(node) = self.arena.node_weight_mut(idx) else {
                    continue;
                };
                if node.dirty {
                    continue;
                }
                node.dirty = true;
            }
            trace!(node = %current, "marked dirty");

            let mut downstream: Vec<(NodeId, PortSlot)> = Vec::new();
            for e in self.arena.edges_directed(idx, Direction::Outgoing) {
                let w = e.weight();
                if w.source.dir == PortDir::Out {
                    downstream.push((NodeId::from(e.target()), w.target));
                }
            }
            for (node, slot) in downstream {
                if let Some(n) = self.arena.node_weight_mut(node.into()) {
                    if let Some(p) = n.port_mut(slot) {
                        p.dirty = true;
                    }
                }
                work.push(node);
            }
        }
        Ok(())
    }

    /// True iff the node exists and its dirty flag is set.
    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(NodeData::is_dirty)
    }

    /// Clears the node's dirty flag. Purely local: clearing never cascades.
    pub fn clear_dirty(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.node_ref_mut(id)?.dirty = false;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Topology queries
    // -----------------------------------------------------------------------

    fn has_connected_output(&self, node: NodeId) -> bool {
        let Some(data) = self.node(node) else {
            return false;
        };
        (0..data.output_count())
            .any(|i| self.is_port_connected(PortRef::output(node, i as u16)))
    }

    fn has_connected_input(&self, node: NodeId) -> bool {
        let Some(data) = self.node(node) else {
            return false;
        };
        (0..data.input_count()).any(|i| self.is_port_connected(PortRef::input(node, i as u16)))
    }

    /// The "head" of every disjoint sub-network: each top-level node that is
    /// wholly unconnected, or whose output ports all lack peers.
    ///
    /// Naming quirk preserved from the public contract: a node without
    /// connected outputs is conventionally a *sink*, but this query has
    /// always called them heads. Nodes are classified independently, with no
    /// component grouping.
    pub fn network_heads(&self) -> Vec<NodeId> {
        self.top_level
            .iter()
            .copied()
            .filter(|&n| !self.has_connected_output(n))
            .collect()
    }

    /// The "tail" of every disjoint sub-network: each top-level node that is
    /// wholly unconnected, or whose input ports all lack peers.
    ///
    /// Same naming quirk as [`network_heads`](Self::network_heads): these
    /// are conventionally *sources*.
    pub fn network_tails(&self) -> Vec<NodeId> {
        self.top_level
            .iter()
            .copied()
            .filter(|&n| !self.has_connected_input(n))
            .collect()
    }
}

impl Default for DataflowGraph {
    fn default() -> Self {
        Self::new()
    }
}
