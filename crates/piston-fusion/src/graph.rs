//! Fusion graph representation.

use slotmap::{SlotMap, new_key_type};

use crate::{DType, HashSet, InvariantError, RVec, Subgraph, rvec};

new_key_type! {
    /// Unique identifier for a kernel in the fusion graph.
    pub struct KernelId;
}

/// An input or output port of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_new::new)]
pub struct PortRef {
    pub node: KernelId,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelKind {
    /// A graph input. Has one output and no body.
    Input(DType),
    /// A fusion candidate with a body.
    Kernel,
}

/// A node in the fusion graph: one candidate kernel.
#[derive(Debug, Clone)]
pub struct KernelNode {
    /// Unique identifier
    pub id: KernelId,

    pub name: String,

    pub kind: KernelKind,

    /// Source output port feeding each input
    pub inputs: RVec<PortRef>,

    /// Consumer input ports of each output
    pub consumers: RVec<RVec<PortRef>>,

    /// Kernel body. Empty for graph inputs.
    pub body: Subgraph,
}

impl KernelNode {
    pub fn is_input(&self) -> bool {
        matches!(self.kind, KernelKind::Input(_))
    }
}

/// The DAG of fusion candidates.
///
/// Nodes are kernels; edges connect a kernel output port to a kernel input port. A
/// kernel's input `i` corresponds to the `i`-th `Data` op of its body, output `j` to
/// the `j`-th `Output` op.
#[derive(Debug, Default)]
pub struct FusionGraph {
    /// All nodes in the graph
    pub nodes: SlotMap<KernelId, KernelNode>,

    /// Ports read from outside the graph
    pub outputs: Vec<PortRef>,
}

impl FusionGraph {
    /// Create an empty fusion graph.
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            outputs: Vec::new(),
        }
    }

    pub fn add_input(&mut self, name: impl Into<String>, dtype: DType) -> KernelId {
        let name = name.into();
        let id = self.nodes.insert(KernelNode {
            id: KernelId::default(),
            body: Subgraph::new(name.clone()),
            name,
            kind: KernelKind::Input(dtype),
            inputs: RVec::new(),
            consumers: rvec![RVec::new()],
        });
        self.nodes[id].id = id;
        id
    }

    /// Add a kernel whose body input `i` is fed by `inputs[i]`.
    pub fn add_kernel(
        &mut self,
        name: impl Into<String>,
        body: Subgraph,
        inputs: &[PortRef],
    ) -> Result<KernelId, InvariantError> {
        let name = name.into();
        if body.input_count() != inputs.len() {
            return Err(InvariantError::InputArity {
                node: name,
                expected: body.input_count(),
                actual: inputs.len(),
            });
        }
        body.validate()?;
        for port in inputs {
            let src = self.node(port.node)?;
            if port.index >= src.consumers.len() {
                return Err(InvariantError::PortOutOfRange {
                    node: src.name.clone(),
                    index: port.index,
                    len: src.consumers.len(),
                });
            }
        }

        let consumers = (0..body.output_count()).map(|_| RVec::new()).collect();
        let id = self.nodes.insert(KernelNode {
            id: KernelId::default(),
            name,
            kind: KernelKind::Kernel,
            inputs: inputs.iter().copied().collect(),
            consumers,
            body,
        });
        self.nodes[id].id = id;
        for (i, port) in inputs.iter().enumerate() {
            self.nodes[port.node].consumers[port.index].push(PortRef::new(id, i));
        }
        Ok(id)
    }

    /// Mark an output port as read from outside the graph.
    pub fn mark_output(&mut self, port: PortRef) -> Result<(), InvariantError> {
        let node = self.node(port.node)?;
        if port.index >= node.consumers.len() {
            return Err(InvariantError::PortOutOfRange {
                node: node.name.clone(),
                index: port.index,
                len: node.consumers.len(),
            });
        }
        self.outputs.push(port);
        Ok(())
    }

    pub fn node(&self, id: KernelId) -> Result<&KernelNode, InvariantError> {
        self.nodes.get(id).ok_or(InvariantError::UnknownKernel(id))
    }

    /// Element type written to `port`.
    pub fn port_dtype(&self, port: PortRef) -> Result<DType, InvariantError> {
        let node = self.node(port.node)?;
        match node.kind {
            KernelKind::Input(dtype) => Ok(dtype),
            KernelKind::Kernel => Ok(node.body.output_desc(port.index)?.dtype),
        }
    }

    pub fn is_graph_output(&self, port: PortRef) -> bool {
        self.outputs.contains(&port)
    }

    /// Kernels directly consuming any output of `id`.
    pub fn successors(&self, id: KernelId) -> impl Iterator<Item = KernelId> + '_ {
        self.nodes
            .get(id)
            .into_iter()
            .flat_map(|n| n.consumers.iter().flatten().map(|p| p.node))
    }

    /// True if `to` is reachable from `from` through at least one kernel other than
    /// `from` and `to`.
    pub fn reaches_through_other(&self, from: KernelId, to: KernelId) -> bool {
        let mut visited = HashSet::default();
        let mut stack: Vec<KernelId> = self.successors(from).filter(|s| *s != to).collect();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            for next in self.successors(id) {
                if next == to {
                    return true;
                }
                if next != from {
                    stack.push(next);
                }
            }
        }
        false
    }
}
