use crate::{AxisId, DType, Expr, InvariantError, RVec, rvec};

/// Per-port view of a tensor in terms of its subgraph's loop axes.
///
/// `axis`, `repeats` and `strides` run in parallel. A slot with `repeat == 1` and
/// `stride == 0` is broadcast-eligible.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorDesc {
    pub axis: RVec<AxisId>,
    pub repeats: RVec<Expr>,
    pub strides: RVec<Expr>,
    pub offset: Expr,
    pub dtype: DType,
}

impl TensorDesc {
    pub fn new(
        axis: RVec<AxisId>,
        repeats: RVec<Expr>,
        strides: RVec<Expr>,
        offset: Expr,
        dtype: DType,
    ) -> Self {
        Self {
            axis,
            repeats,
            strides,
            offset,
            dtype,
        }
    }

    /// Dense row-major descriptor with zero offset.
    pub fn contiguous(axis: RVec<AxisId>, repeats: RVec<Expr>, dtype: DType) -> Self {
        let strides = contiguous_strides(&repeats);
        Self::new(axis, repeats, strides, Expr::ZERO, dtype)
    }

    pub fn rank(&self) -> usize {
        self.axis.len()
    }

    pub fn position(&self, axis: AxisId) -> Option<usize> {
        self.axis.iter().position(|a| *a == axis)
    }

    pub fn is_broadcast_slot(&self, index: usize) -> bool {
        self.repeats[index].is_one() && self.strides[index].is_zero()
    }

    pub fn is_contiguous(&self) -> bool {
        self.offset.is_zero() && self.strides == contiguous_strides(&self.repeats)
    }

    /// Same extents, strides and offset. Axis ids and dtype are not compared.
    pub fn same_layout(&self, other: &TensorDesc) -> bool {
        self.repeats == other.repeats
            && self.strides == other.strides
            && self.offset == other.offset
    }

    pub fn with_offset(mut self, offset: impl Into<Expr>) -> Self {
        self.offset = offset.into();
        self
    }

    pub fn with_strides(mut self, strides: RVec<Expr>) -> Self {
        self.strides = strides;
        self
    }

    /// Rewrite the axis ids through `f`, keeping ids for which `f` returns `None`.
    pub fn map_axes(&self, f: impl Fn(AxisId) -> Option<AxisId>) -> Self {
        let mut desc = self.clone();
        for a in desc.axis.iter_mut() {
            if let Some(mapped) = f(*a) {
                *a = mapped;
            }
        }
        desc
    }

    pub fn validate(&self, node: &str) -> Result<(), InvariantError> {
        if self.axis.len() != self.repeats.len() || self.axis.len() != self.strides.len() {
            return Err(InvariantError::DescLengthMismatch {
                node: node.to_string(),
                axes: self.axis.len(),
                repeats: self.repeats.len(),
                strides: self.strides.len(),
            });
        }
        for (i, a) in self.axis.iter().enumerate() {
            if self.axis[..i].contains(a) {
                return Err(InvariantError::DuplicateAxis {
                    node: node.to_string(),
                    axis: *a,
                });
            }
        }
        Ok(())
    }
}

/// Row-major strides for `repeats`. Size-1 slots get stride 0.
pub fn contiguous_strides(repeats: &[Expr]) -> RVec<Expr> {
    let mut strides: RVec<Expr> = rvec![Expr::ZERO; repeats.len()];
    let mut running = Expr::ONE;
    for (i, size) in repeats.iter().enumerate().rev() {
        if size.is_one() {
            continue;
        }
        strides[i] = running.clone();
        running = running * size.clone();
    }
    strides
}
