//! How two kernels are connected, and what the merged kernel's ports would be.

use crate::{FusionError, FusionGraph, InvariantError, KernelId, KernelNode, PortRef, RejectReason};

/// Links between a candidate pair and the port layout of the merged kernel.
///
/// `node1` is always the producer side of any producer/consumer link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityInfo {
    pub node1: KernelId,
    pub node2: KernelId,

    /// `(node1 input, node2 input)` pairs reading the same source port. Each node2
    /// input appears at most once.
    pub same_inputs: Vec<(usize, usize)>,

    /// `(node1 output, node2 input)` producer/consumer links.
    pub vertical: Vec<(usize, usize)>,

    /// Per node1 output: read outside the pair, read more than once, or a graph output.
    pub node1_multi_ref: Vec<bool>,

    /// Per node2 output: read more than once or a graph output.
    pub node2_multi_ref: Vec<bool>,

    /// Merged-kernel input slot of each node1 input.
    pub node1_input_map: Vec<usize>,

    /// Merged-kernel input slot of each node2 input. `None` when fed by node1.
    pub node2_input_map: Vec<Option<usize>>,

    /// Source port of each merged-kernel input.
    pub merged_inputs: Vec<PortRef>,

    /// Merged-kernel output slot of each node1 output. `None` when only node2 reads it.
    pub node1_output_map: Vec<Option<usize>>,

    /// Merged-kernel output slot of each node2 output.
    pub node2_output_map: Vec<usize>,

    /// Original port of each merged-kernel output.
    pub merged_outputs: Vec<PortRef>,
}

impl ConnectivityInfo {
    pub fn has_vertical(&self) -> bool {
        !self.vertical.is_empty()
    }

    pub fn has_horizontal(&self) -> bool {
        !self.same_inputs.is_empty()
    }

    pub fn merged_input_count(&self) -> usize {
        self.merged_inputs.len()
    }

    pub fn merged_output_count(&self) -> usize {
        self.merged_outputs.len()
    }
}

/// Compute the [`ConnectivityInfo`] of `node1` → `node2`.
///
/// Only links running from node1 to node2 are vertical; callers wanting either order
/// should try both. Fails with [`RejectReason::NoRelation`] if the nodes share no input
/// and node2 reads nothing from node1.
pub fn analyze(
    graph: &FusionGraph,
    node1: KernelId,
    node2: KernelId,
) -> Result<ConnectivityInfo, FusionError> {
    if node1 == node2 {
        return Err(InvariantError::SelfFusion(node1).into());
    }
    let n1 = kernel(graph, node1)?;
    let n2 = kernel(graph, node2)?;

    let mut same_inputs = Vec::new();
    let mut vertical = Vec::new();
    for (j, src) in n2.inputs.iter().enumerate() {
        if src.node == node1 {
            vertical.push((src.index, j));
        } else if let Some(i) = n1.inputs.iter().position(|s| s == src) {
            same_inputs.push((i, j));
        }
    }
    if same_inputs.is_empty() && vertical.is_empty() {
        log::trace!("{} and {} are unrelated", n1.name, n2.name);
        return Err(RejectReason::NoRelation.into());
    }

    let node1_multi_ref = (0..n1.consumers.len())
        .map(|o| {
            let consumers = &n1.consumers[o];
            consumers.len() > 1
                || consumers.iter().any(|c| c.node != node2)
                || graph.is_graph_output(PortRef::new(node1, o))
        })
        .collect();
    let node2_multi_ref = (0..n2.consumers.len())
        .map(|o| n2.consumers[o].len() > 1 || graph.is_graph_output(PortRef::new(node2, o)))
        .collect();

    let mut merged_inputs: Vec<PortRef> = n1.inputs.to_vec();
    let node1_input_map = (0..n1.inputs.len()).collect();
    let mut node2_input_map = Vec::with_capacity(n2.inputs.len());
    for (j, src) in n2.inputs.iter().enumerate() {
        if src.node == node1 {
            node2_input_map.push(None);
            continue;
        }
        let shared = match same_inputs.iter().find(|(_, jj)| *jj == j) {
            Some(&(i, _)) if !sliced_differently(n1, i, n2, j)? => Some(i),
            _ => None,
        };
        let slot = shared.unwrap_or_else(|| {
            merged_inputs.push(*src);
            merged_inputs.len() - 1
        });
        node2_input_map.push(Some(slot));
    }

    let mut merged_outputs = Vec::new();
    let mut node1_output_map = Vec::with_capacity(n1.consumers.len());
    for (o, consumers) in n1.consumers.iter().enumerate() {
        let port = PortRef::new(node1, o);
        let internal = !consumers.is_empty()
            && consumers.iter().all(|c| c.node == node2)
            && !graph.is_graph_output(port);
        if internal {
            node1_output_map.push(None);
        } else {
            merged_outputs.push(port);
            node1_output_map.push(Some(merged_outputs.len() - 1));
        }
    }
    let mut node2_output_map = Vec::with_capacity(n2.consumers.len());
    for o in 0..n2.consumers.len() {
        merged_outputs.push(PortRef::new(node2, o));
        node2_output_map.push(merged_outputs.len() - 1);
    }

    Ok(ConnectivityInfo {
        node1,
        node2,
        same_inputs,
        vertical,
        node1_multi_ref,
        node2_multi_ref,
        node1_input_map,
        node2_input_map,
        merged_inputs,
        node1_output_map,
        node2_output_map,
        merged_outputs,
    })
}

fn kernel(graph: &FusionGraph, id: KernelId) -> Result<&KernelNode, InvariantError> {
    let node = graph.node(id)?;
    if node.is_input() {
        return Err(InvariantError::NotAKernel(id));
    }
    Ok(node)
}

// Two loads of one source keep separate slots when node2 reads a real slice of it
// that node1 does not.
fn sliced_differently(
    n1: &KernelNode,
    i: usize,
    n2: &KernelNode,
    j: usize,
) -> Result<bool, InvariantError> {
    let d1 = n1.body.input_desc(i)?;
    let d2 = n2.body.input_desc(j)?;
    Ok(!d2.is_contiguous() && !d2.same_layout(d1))
}
