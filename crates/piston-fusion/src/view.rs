//! View inference across a load/store boundary.
//!
//! A view is a broadcast, transpose or slice expressed only through the extents,
//! strides and offset of a [`TensorDesc`]. [`back_step`] derives the view turning
//! `pre` into `post`; [`apply_view`] re-applies it to a surviving descriptor once the
//! redundant boundary op is gone.

use crate::{AxisId, Expr, InvariantError, RVec, TensorDesc, contiguous_strides};

#[derive(Debug, Clone, PartialEq, Eq, derive_new::new)]
pub struct BroadcastAxis {
    pub position: usize,
    pub axis: AxisId,
    /// Extent the size-1 slot is expanded to.
    pub repeat: Expr,
}

/// One transposition. `axes` are the ids found at `positions` when the swap runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_new::new)]
pub struct TransposeSwap {
    pub positions: (usize, usize),
    pub axes: (AxisId, AxisId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceAxis {
    pub axis: AxisId,
    pub stride: Expr,
    /// First index of the sub-range along this axis.
    pub start: Expr,
    /// `start * stride`.
    pub offset: Expr,
    pub is_real_slice: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceInfo {
    pub axes: RVec<SliceAxis>,
    /// Part of the offset not attributable to any axis.
    pub residual: Expr,
    pub is_real_slice: bool,
}

impl SliceInfo {
    pub fn offset(&self) -> Expr {
        self.axes
            .iter()
            .fold(self.residual.clone(), |acc, a| acc + a.offset.clone())
    }
}

/// Broadcast, transpose and slice found across one boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ViewOpAttrInfo {
    pub broadcast: RVec<BroadcastAxis>,
    pub transpose: RVec<TransposeSwap>,
    pub slice: Option<SliceInfo>,
}

impl ViewOpAttrInfo {
    pub fn is_empty(&self) -> bool {
        self.broadcast.is_empty() && self.transpose.is_empty() && self.slice.is_none()
    }

    pub fn has_broadcast(&self) -> bool {
        !self.broadcast.is_empty()
    }

    pub fn has_transpose(&self) -> bool {
        !self.transpose.is_empty()
    }

    pub fn has_real_slice(&self) -> bool {
        self.slice.as_ref().is_some_and(|s| s.is_real_slice)
    }

    pub fn broadcast_axes(&self) -> RVec<AxisId> {
        self.broadcast.iter().map(|b| b.axis).collect()
    }

    pub fn broadcasts_position(&self, position: usize) -> bool {
        self.broadcast.iter().any(|b| b.position == position)
    }
}

/// A boundary that can be dropped without re-applying any view.
pub fn is_simplest_load(pre: &TensorDesc, post: &TensorDesc, followed_by_broadcast: bool) -> bool {
    !followed_by_broadcast && pre.same_layout(post)
}

/// Derive the view turning `pre` into `post`.
///
/// Descriptors of different rank have no expressible view. Slices are only looked for
/// when there is no broadcast or transpose.
pub fn back_step(pre: &TensorDesc, post: &TensorDesc) -> ViewOpAttrInfo {
    let mut view = ViewOpAttrInfo::default();
    if pre.rank() != post.rank() {
        log::trace!("rank {} -> {}: no view", pre.rank(), post.rank());
        return view;
    }

    let mut aligned = pre.clone();
    if let Some(swaps) = transpose_swaps(&pre.axis, &post.axis) {
        for swap in &swaps {
            swap_slots(&mut aligned, swap.positions);
        }
        view.transpose = swaps;
    }

    for i in 0..aligned.rank() {
        if aligned.is_broadcast_slot(i) && !post.repeats[i].is_one() {
            view.broadcast.push(BroadcastAxis::new(
                i,
                aligned.axis[i],
                post.repeats[i].clone(),
            ));
        }
    }

    if view.broadcast.is_empty() && view.transpose.is_empty() {
        view.slice = slice_info(pre, post);
    }
    log::trace!("back_step {:?} -> {:?}: {view:?}", pre.axis, post.axis);
    view
}

/// Broadcasts across a boundary between two kernels whose axis ids are unrelated.
///
/// Slots are matched by position and the result names `pre`'s axes. Empty when the
/// ranks differ.
pub fn boundary_broadcast(pre: &TensorDesc, post: &TensorDesc) -> ViewOpAttrInfo {
    let mut view = ViewOpAttrInfo::default();
    if pre.rank() != post.rank() {
        return view;
    }
    for i in 0..pre.rank() {
        if pre.is_broadcast_slot(i) && !post.repeats[i].is_one() {
            view.broadcast.push(BroadcastAxis::new(
                i,
                pre.axis[i],
                post.repeats[i].clone(),
            ));
        }
    }
    view
}

/// Re-apply a derived view to `desc`: transpose, then broadcast, then slice.
pub fn apply_view(desc: &mut TensorDesc, view: &ViewOpAttrInfo) -> Result<(), InvariantError> {
    for swap in &view.transpose {
        let (i, j) = swap.positions;
        if i >= desc.rank() || j >= desc.rank() {
            return Err(InvariantError::ViewSwapOutOfRange(i, j));
        }
        swap_slots(desc, swap.positions);
    }

    if !view.broadcast.is_empty() {
        for b in &view.broadcast {
            let pos = desc
                .position(b.axis)
                .ok_or(InvariantError::ViewAxisMissing(b.axis))?;
            desc.repeats[pos] = b.repeat.clone();
        }
        desc.strides = contiguous_strides(&desc.repeats);
    }

    if let Some(slice) = &view.slice {
        for s in &slice.axes {
            let pos = desc
                .position(s.axis)
                .ok_or(InvariantError::ViewAxisMissing(s.axis))?;
            desc.strides[pos] = s.stride.clone();
        }
        desc.offset = slice.offset();
    }
    Ok(())
}

/// Apply the transpose part of `view` to a dependent axis list, such as a schedule.
/// Swaps naming an axis the list does not carry are skipped.
pub fn apply_view_to_axes(axes: &mut [AxisId], view: &ViewOpAttrInfo) {
    for swap in &view.transpose {
        let (a, b) = swap.axes;
        let pa = axes.iter().position(|x| *x == a);
        let pb = axes.iter().position(|x| *x == b);
        if let (Some(pa), Some(pb)) = (pa, pb) {
            axes.swap(pa, pb);
        }
    }
}

/// Minimum sequence of swaps turning `from` into `to`, or `None` if `to` is not a
/// distinct reordering of `from`.
///
/// Follows each cycle of the permutation and emits `len - 1` swaps per cycle, giving
/// `n - cycles` swaps in total.
pub fn transpose_swaps(from: &[AxisId], to: &[AxisId]) -> Option<RVec<TransposeSwap>> {
    if from.len() != to.len() || from == to {
        return None;
    }
    // perm[i]: where to[i] currently sits in `from`
    let mut perm = Vec::with_capacity(to.len());
    for (i, axis) in to.iter().enumerate() {
        if to[..i].contains(axis) {
            return None;
        }
        perm.push(from.iter().position(|a| a == axis)?);
    }

    let mut order = from.to_vec();
    let mut swaps = RVec::new();
    let mut visited = vec![false; perm.len()];
    for start in 0..perm.len() {
        if visited[start] {
            continue;
        }
        let mut cycle = vec![start];
        visited[start] = true;
        let mut next = perm[start];
        while next != start {
            visited[next] = true;
            cycle.push(next);
            next = perm[next];
        }
        for pair in cycle.windows(2) {
            let (i, j) = (pair[0], pair[1]);
            swaps.push(TransposeSwap::new((i, j), (order[i], order[j])));
            order.swap(i, j);
        }
    }
    Some(swaps)
}

fn swap_slots(desc: &mut TensorDesc, (i, j): (usize, usize)) {
    desc.axis.swap(i, j);
    desc.repeats.swap(i, j);
    desc.strides.swap(i, j);
}

fn slice_info(pre: &TensorDesc, post: &TensorDesc) -> Option<SliceInfo> {
    if pre.axis != post.axis || pre.repeats != post.repeats {
        return None;
    }
    if pre.strides == post.strides && pre.offset == post.offset {
        return None;
    }
    let contiguous = contiguous_strides(&pre.repeats);
    let is_real_slice = post.strides != contiguous || !post.offset.is_zero();

    // Peel the offset apart axis by axis, outermost first.
    let mut residual = post.offset.clone();
    let mut axes = RVec::new();
    for (i, stride) in post.strides.iter().enumerate() {
        let start = match residual.div_floor(stride) {
            Some(q) if q > 0 => q,
            _ => 0,
        };
        let offset = stride.clone() * start;
        if start > 0 {
            residual = residual + offset.clone() * -1;
        }
        axes.push(SliceAxis {
            axis: post.axis[i],
            stride: stride.clone(),
            start: Expr::from(start),
            offset,
            is_real_slice: *stride != contiguous[i] || start != 0,
        });
    }
    Some(SliceInfo {
        axes,
        residual,
        is_real_slice,
    })
}
