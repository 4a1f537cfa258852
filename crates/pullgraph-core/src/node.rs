//! Node data stored in the arena.
//!
//! All nodes -- top-level and container-internal alike -- live in one flat
//! arena. Container membership is ownership metadata: a child carries
//! `parent = Some(container)` and the container lists the child, so boundary
//! wiring can be classified without a second graph structure.
//!
//! A new node starts dirty: it has never been computed, so its outputs
//! cannot be trusted until the first evaluation.

use std::fmt;

use crate::id::NodeId;
use crate::kind::NodeKind;
use crate::port::{Port, PortDir, PortList, PortSlot};

/// A node in the dataflow graph, wrapping a computation kind with its ports
/// and ownership metadata.
#[derive(Debug, Clone)]
pub struct NodeData {
    /// The computation this node performs.
    pub kind: NodeKind,
    /// Instance identifier assigned by the factory. Not persisted.
    pub runtime_id: u32,
    /// User-editable display name. Defaults to the kind's type tag.
    pub label: String,
    pub(crate) inputs: PortList,
    pub(crate) outputs: PortList,
    pub(crate) dirty: bool,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl NodeData {
    /// Creates a node with the kind's standard port shape.
    pub(crate) fn new(kind: NodeKind, runtime_id: u32) -> Self {
        let mut inputs = PortList::new();
        for name in kind.input_shape() {
            inputs.push(Port::new(*name, 0.0));
        }
        let mut outputs = PortList::new();
        for name in kind.output_shape() {
            outputs.push(Port::new(*name, 0.0));
        }

        NodeData {
            kind,
            runtime_id,
            label: kind.name().to_string(),
            inputs,
            outputs,
            dirty: true,
            parent: None,
            children: Vec::new(),
        }
    }

    /// The ordered input ports.
    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    /// The ordered output ports.
    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Position of the first input port with this name.
    pub fn input_index(&self, name: &str) -> Option<u16> {
        self.inputs.iter().position(|p| p.name == name).map(|i| i as u16)
    }

    /// Position of the first output port with this name.
    pub fn output_index(&self, name: &str) -> Option<u16> {
        self.outputs.iter().position(|p| p.name == name).map(|i| i as u16)
    }

    /// Resolves a slot to its port, if the index is in range.
    pub fn port(&self, slot: PortSlot) -> Option<&Port> {
        match slot.dir {
            PortDir::In => self.inputs.get(slot.index as usize),
            PortDir::Out => self.outputs.get(slot.index as usize),
        }
    }

    pub(crate) fn port_mut(&mut self, slot: PortSlot) -> Option<&mut Port> {
        match slot.dir {
            PortDir::In => self.inputs.get_mut(slot.index as usize),
            PortDir::Out => self.outputs.get_mut(slot.index as usize),
        }
    }

    pub(crate) fn add_input(&mut self, name: &str, default: f64) -> u16 {
        self.inputs.push(Port::new(name, default));
        (self.inputs.len() - 1) as u16
    }

    pub(crate) fn add_output(&mut self, name: &str) -> u16 {
        self.outputs.push(Port::new(name, 0.0));
        (self.outputs.len() - 1) as u16
    }

    /// True when the cached outputs may not reflect current inputs.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// True for container nodes.
    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }

    /// The owning container, for container-internal nodes.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// The internal node collection. Empty for non-containers.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

impl fmt::Display for NodeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}' [{} in, {} out]",
            self.kind.name(),
            self.label,
            self.inputs.len(),
            self.outputs.len()
        )
    }
}
