#![allow(dead_code)]

use piston_fusion::{
    AxisId, DType, Expr, FusePair, FusionError, FusionStrategy, OpAttr, OpKind, RVec, Subgraph,
    TensorDesc,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn contiguous(axes: &[AxisId], sizes: &[i64]) -> TensorDesc {
    TensorDesc::contiguous(
        axes.iter().copied().collect(),
        sizes.iter().map(|&s| Expr::from(s)).collect(),
        DType::F32,
    )
}

pub fn strided(axes: &[AxisId], sizes: &[i64], strides: &[i64]) -> TensorDesc {
    TensorDesc::new(
        axes.iter().copied().collect(),
        sizes.iter().map(|&s| Expr::from(s)).collect(),
        strides.iter().map(|&s| Expr::from(s)).collect(),
        Expr::ZERO,
        DType::F32,
    )
}

/// Declare one axis per size and schedule them in order.
pub fn axes(sg: &mut Subgraph, sizes: &[i64]) -> anyhow::Result<Vec<AxisId>> {
    let axes: Vec<AxisId> = sizes
        .iter()
        .enumerate()
        .map(|(i, s)| sg.add_axis(format!("z{i}"), *s))
        .collect();
    sg.set_sched_axes(&axes)?;
    Ok(axes)
}

/// `inputs` contiguous loads -> one op of `kind` -> store, all over `sizes`.
pub fn single(name: &str, kind: OpKind, sizes: &[i64], inputs: usize) -> anyhow::Result<Subgraph> {
    let mut sg = Subgraph::new(name);
    let axes = axes(&mut sg, sizes)?;
    let desc = contiguous(&axes, sizes);
    let mut loads: RVec<_> = RVec::new();
    for _ in 0..inputs {
        let d = sg.data(DType::F32)?;
        loads.push(sg.load(d, desc.clone())?);
    }
    let op = sg.compute(kind, name, &loads, desc.clone())?;
    let s = sg.store(op, desc)?;
    sg.output(s)?;
    Ok(sg)
}

pub fn pointwise(name: &str, sizes: &[i64]) -> anyhow::Result<Subgraph> {
    single(name, OpKind::Pointwise, sizes, 1)
}

/// Sums `[8, 4]` over its inner axis into `[8, 1]`, followed by `epilogue` pointwise ops.
pub fn reduction(name: &str, epilogue: usize) -> anyhow::Result<Subgraph> {
    let mut sg = Subgraph::new(name);
    let axes = axes(&mut sg, &[8, 4])?;
    let kept = contiguous(&axes, &[8, 1]);
    let d = sg.data(DType::F32)?;
    let l = sg.load(d, contiguous(&axes, &[8, 4]))?;
    let mut last = sg.compute_with(
        OpKind::Reduce,
        "sum",
        OpAttr::Reduce {
            axes: RVec::from_elem(axes[1], 1),
        },
        &[l],
        kept.clone(),
    )?;
    for i in 0..epilogue {
        last = sg.compute(OpKind::Pointwise, format!("pw{i}"), &[last], kept.clone())?;
    }
    let s = sg.store(last, kept)?;
    sg.output(s)?;
    Ok(sg)
}

/// Passes every pair and counts how often it was asked.
#[derive(Debug, Default, Clone)]
pub struct CountingStrategy {
    pub calls: Arc<AtomicUsize>,
}

impl CountingStrategy {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FusionStrategy for CountingStrategy {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn can_fuse(&self, _pair: &FusePair<'_>) -> Result<(), FusionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
