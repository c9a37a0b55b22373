//! Kernel body: an arena of ops over a shared set of loop axes.

use slotmap::{SlotMap, new_key_type};

use crate::{
    Axis, AxisId, DType, Expr, FuseType, HashSet, InvariantError, OpKind, RVec, TensorDesc, rvec,
};

new_key_type! {
    /// Handle of an op inside a [`Subgraph`].
    pub struct OpId;
}

/// An input or output port of an op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_new::new)]
pub struct OpPort {
    pub op: OpId,
    pub index: usize,
}

/// Identifies the original split a split/slice op was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SplitOrigin(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OpAttr {
    #[default]
    None,
    /// Kernel input/output index of a `Data`/`Output` op.
    Io(usize),
    /// Axes reduced by a `Reduce` op.
    Reduce { axes: RVec<AxisId> },
    /// Source split of a `Split`/`Slice` op.
    Split(SplitOrigin),
}

#[derive(Debug, Clone)]
pub struct OpNode {
    pub id: OpId,
    pub name: String,
    pub kind: OpKind,
    pub attr: OpAttr,
    /// Source output port feeding each input.
    pub inputs: RVec<OpPort>,
    /// One descriptor per output port.
    pub outputs: RVec<TensorDesc>,
    /// Consumer input ports of each output port.
    pub consumers: RVec<RVec<OpPort>>,
}

/// The body of one fusion candidate.
///
/// Ops are added in topological order. `Data` ops are the kernel inputs and `Output`
/// ops the kernel outputs, both numbered in insertion order.
#[derive(Debug, Clone)]
pub struct Subgraph {
    name: String,
    axes: Vec<Axis>,
    sched_axes: RVec<AxisId>,
    nodes: SlotMap<OpId, OpNode>,
    order: Vec<OpId>,
    inputs: Vec<OpId>,
    outputs: Vec<OpId>,
    fuse_type: FuseType,
}

impl Subgraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            axes: Vec::new(),
            sched_axes: RVec::new(),
            nodes: SlotMap::with_key(),
            order: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            fuse_type: FuseType::EMPTY,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_axis(&mut self, name: impl Into<String>, size: impl Into<Expr>) -> AxisId {
        let id = AxisId(self.axes.len());
        self.axes.push(Axis::new(id, name.into(), size.into()));
        id
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn axis(&self, id: AxisId) -> Option<&Axis> {
        self.axes.get(id.0).filter(|a| a.id == id)
    }

    pub fn axis_size(&self, id: AxisId) -> Result<&Expr, InvariantError> {
        self.axis(id)
            .map(|a| &a.size)
            .ok_or_else(|| InvariantError::UndeclaredAxis {
                subgraph: self.name.clone(),
                node: "schedule".to_string(),
                axis: id,
            })
    }

    /// Whole iteration space of the kernel, outermost first.
    pub fn sched_axes(&self) -> &[AxisId] {
        &self.sched_axes
    }

    pub fn set_sched_axes(&mut self, axes: &[AxisId]) -> Result<(), InvariantError> {
        for (i, a) in axes.iter().enumerate() {
            self.check_axis_declared("schedule", *a)?;
            if axes[..i].contains(a) {
                return Err(InvariantError::DuplicateAxis {
                    node: format!("{} schedule", self.name),
                    axis: *a,
                });
            }
        }
        self.sched_axes = axes.iter().copied().collect();
        Ok(())
    }

    pub fn fuse_type(&self) -> FuseType {
        self.fuse_type
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn get(&self, id: OpId) -> Option<&OpNode> {
        self.nodes.get(id)
    }

    pub fn node(&self, id: OpId) -> Result<&OpNode, InvariantError> {
        self.nodes.get(id).ok_or_else(|| InvariantError::UnknownOp {
            subgraph: self.name.clone(),
            op: id,
        })
    }

    /// Ops in insertion (topological) order.
    pub fn nodes(&self) -> impl Iterator<Item = &OpNode> {
        self.order.iter().map(|id| &self.nodes[*id])
    }

    pub fn add_node(
        &mut self,
        kind: OpKind,
        name: impl Into<String>,
        attr: OpAttr,
        inputs: &[OpPort],
        outputs: RVec<TensorDesc>,
    ) -> Result<OpId, InvariantError> {
        let name = name.into();
        for port in inputs {
            let src = self.node(port.op)?;
            if port.index >= src.outputs.len() {
                return Err(InvariantError::PortOutOfRange {
                    node: src.name.clone(),
                    index: port.index,
                    len: src.outputs.len(),
                });
            }
        }
        for desc in &outputs {
            desc.validate(&name)?;
            for a in &desc.axis {
                self.check_axis_declared(&name, *a)?;
            }
        }
        if let OpAttr::Reduce { axes } = &attr {
            for a in axes {
                self.check_axis_declared(&name, *a)?;
            }
        }

        let consumers = outputs.iter().map(|_| RVec::new()).collect();
        let id = self.nodes.insert(OpNode {
            id: OpId::default(),
            name,
            kind,
            attr,
            inputs: inputs.iter().copied().collect(),
            outputs,
            consumers,
        });
        self.nodes[id].id = id;
        for (i, port) in inputs.iter().enumerate() {
            self.nodes[port.op].consumers[port.index].push(OpPort::new(id, i));
        }
        self.order.push(id);
        self.fuse_type |= kind.fuse_type();
        match kind {
            OpKind::Data => self.inputs.push(id),
            OpKind::Output => self.outputs.push(id),
            _ => {}
        }
        Ok(id)
    }

    /// Declare the next kernel input.
    pub fn data(&mut self, dtype: DType) -> Result<OpId, InvariantError> {
        let index = self.inputs.len();
        let placeholder = TensorDesc::new(rvec![], rvec![], rvec![], Expr::ZERO, dtype);
        self.add_node(
            OpKind::Data,
            format!("data{index}"),
            OpAttr::Io(index),
            &[],
            rvec![placeholder],
        )
    }

    pub fn load(&mut self, data: OpId, desc: TensorDesc) -> Result<OpId, InvariantError> {
        let name = format!("load{}", self.count(OpKind::Load));
        self.add_node(
            OpKind::Load,
            name,
            OpAttr::None,
            &[OpPort::new(data, 0)],
            rvec![desc],
        )
    }

    pub fn compute(
        &mut self,
        kind: OpKind,
        name: impl Into<String>,
        inputs: &[OpId],
        desc: TensorDesc,
    ) -> Result<OpId, InvariantError> {
        self.compute_with(kind, name, OpAttr::None, inputs, desc)
    }

    pub fn compute_with(
        &mut self,
        kind: OpKind,
        name: impl Into<String>,
        attr: OpAttr,
        inputs: &[OpId],
        desc: TensorDesc,
    ) -> Result<OpId, InvariantError> {
        let ports: RVec<OpPort> = inputs.iter().map(|id| OpPort::new(*id, 0)).collect();
        self.add_node(kind, name, attr, &ports, rvec![desc])
    }

    pub fn store(&mut self, src: OpId, desc: TensorDesc) -> Result<OpId, InvariantError> {
        let name = format!("store{}", self.count(OpKind::Store));
        self.add_node(
            OpKind::Store,
            name,
            OpAttr::None,
            &[OpPort::new(src, 0)],
            rvec![desc],
        )
    }

    /// Declare the next kernel output, written by `store`.
    pub fn output(&mut self, store: OpId) -> Result<OpId, InvariantError> {
        let index = self.outputs.len();
        self.add_node(
            OpKind::Output,
            format!("output{index}"),
            OpAttr::Io(index),
            &[OpPort::new(store, 0)],
            rvec![],
        )
    }

    /// The `Load` reading kernel input `index`.
    pub fn input_load(&self, index: usize) -> Result<OpId, InvariantError> {
        let data = self
            .inputs
            .get(index)
            .ok_or_else(|| InvariantError::MissingBoundary {
                subgraph: self.name.clone(),
                kind: "input",
                index,
            })?;
        self.nodes[*data]
            .consumers
            .iter()
            .flatten()
            .map(|port| port.op)
            .find(|op| self.nodes[*op].kind == OpKind::Load)
            .ok_or_else(|| InvariantError::MissingInputLoad {
                subgraph: self.name.clone(),
                index,
            })
    }

    /// Boundary descriptor of kernel input `index`: how the kernel reads it.
    pub fn input_desc(&self, index: usize) -> Result<&TensorDesc, InvariantError> {
        let load = self.input_load(index)?;
        Ok(&self.nodes[load].outputs[0])
    }

    /// The `Store` writing kernel output `index`.
    pub fn output_store(&self, index: usize) -> Result<OpId, InvariantError> {
        let output = self
            .outputs
            .get(index)
            .ok_or_else(|| InvariantError::MissingBoundary {
                subgraph: self.name.clone(),
                kind: "output",
                index,
            })?;
        match self.nodes[*output].inputs.first() {
            Some(port) if self.nodes[port.op].kind == OpKind::Store => Ok(port.op),
            _ => Err(InvariantError::MissingOutputStore {
                subgraph: self.name.clone(),
                index,
            }),
        }
    }

    /// Boundary descriptor of kernel output `index`: how the kernel writes it.
    pub fn output_desc(&self, index: usize) -> Result<&TensorDesc, InvariantError> {
        let store = self.output_store(index)?;
        Ok(&self.nodes[store].outputs[0])
    }

    pub fn count(&self, kind: OpKind) -> usize {
        self.nodes.values().filter(|n| n.kind == kind).count()
    }

    /// Number of non-boundary ops.
    pub fn compute_node_count(&self) -> usize {
        self.nodes.values().filter(|n| !n.kind.is_boundary()).count()
    }

    /// Pointwise ops downstream of a reduction, i.e. the reduction's fused epilogue.
    pub fn reduce_epilogue_len(&self) -> usize {
        let mut seen = HashSet::default();
        let mut stack: Vec<OpId> = self
            .nodes
            .values()
            .filter(|n| n.kind == OpKind::Reduce)
            .map(|n| n.id)
            .collect();
        while let Some(id) = stack.pop() {
            for port in self.nodes[id].consumers.iter().flatten() {
                if seen.insert(port.op) {
                    stack.push(port.op);
                }
            }
        }
        seen.iter()
            .filter(|id| self.nodes[**id].kind == OpKind::Pointwise)
            .count()
    }

    /// First `Broadcast` op directly consuming `op`, if any.
    pub fn broadcast_after(&self, op: OpId) -> Option<&OpNode> {
        self.nodes
            .get(op)?
            .consumers
            .iter()
            .flatten()
            .map(|port| &self.nodes[port.op])
            .find(|n| n.kind == OpKind::Broadcast)
    }

    pub fn split_origins(&self) -> RVec<SplitOrigin> {
        let mut origins: RVec<SplitOrigin> = self
            .nodes
            .values()
            .filter_map(|n| match n.attr {
                OpAttr::Split(origin) => Some(origin),
                _ => None,
            })
            .collect();
        origins.sort();
        origins.dedup();
        origins
    }

    /// Axes reduced by any `Reduce` op, sorted.
    pub fn reduce_axes(&self) -> RVec<AxisId> {
        let mut axes: RVec<AxisId> = self
            .nodes
            .values()
            .filter_map(|n| match &n.attr {
                OpAttr::Reduce { axes } => Some(axes.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect();
        axes.sort();
        axes.dedup();
        axes
    }

    /// Checks the boundary structure: every input is loaded, every output stored.
    pub fn validate(&self) -> Result<(), InvariantError> {
        for index in 0..self.inputs.len() {
            self.input_load(index)?;
        }
        for index in 0..self.outputs.len() {
            self.output_store(index)?;
        }
        Ok(())
    }

    fn check_axis_declared(&self, node: &str, axis: AxisId) -> Result<(), InvariantError> {
        match self.axis(axis) {
            Some(_) => Ok(()),
            None => Err(InvariantError::UndeclaredAxis {
                subgraph: self.name.clone(),
                node: node.to_string(),
                axis,
            }),
        }
    }
}
