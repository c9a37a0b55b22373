//! Axis correspondence between the two kernels of a candidate pair.
//!
//! One side is the reference: its axis ids are kept as they are. Every edge of the pair
//! contributes pairs mapping the other side's axes onto reference axes. Edges must agree
//! with each other, and the final loop nests must be mergeable.

use crate::{
    AxisId, AxisPairSet, Expr, FuseType, FusionError, InvariantError, RVec, RejectReason,
    Subgraph, TensorDesc, apply_view, boundary_broadcast, find_axis_index_by,
    flatten_to_contiguous_ids, is_same_map_axis,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Node1,
    Node2,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Node1 => Side::Node2,
            Side::Node2 => Side::Node1,
        }
    }
}

// An axis sequence with the extents used to match it.
#[derive(Debug)]
struct Seq {
    side: Side,
    axes: RVec<AxisId>,
    keys: RVec<Expr>,
}

impl Seq {
    fn len(&self) -> usize {
        self.axes.len()
    }
}

/// Builds the axis renaming for a candidate pair, edge by edge.
///
/// `node1` must be the producer side of every vertical link handed to
/// [`AxisSolver::map_vertical`].
#[derive(Debug)]
pub struct AxisSolver<'a> {
    sg1: &'a Subgraph,
    sg2: &'a Subgraph,
    reference: Side,
    map1: AxisPairSet,
    map2: AxisPairSet,
}

impl<'a> AxisSolver<'a> {
    /// The side with more schedule axes is the reference; ties go to node1.
    pub fn new(sg1: &'a Subgraph, sg2: &'a Subgraph) -> Self {
        let reference = if sg2.sched_axes().len() > sg1.sched_axes().len() {
            Side::Node2
        } else {
            Side::Node1
        };
        let identity = |sg: &Subgraph| {
            AxisPairSet::identity(
                sg.sched_axes()
                    .iter()
                    .copied()
                    .chain(sg.axes().iter().map(|a| a.id)),
            )
        };
        let (map1, map2) = match reference {
            Side::Node1 => (identity(sg1), AxisPairSet::new()),
            Side::Node2 => (AxisPairSet::new(), identity(sg2)),
        };
        Self {
            sg1,
            sg2,
            reference,
            map1,
            map2,
        }
    }

    pub fn reference(&self) -> Side {
        self.reference
    }

    pub fn map(&self, side: Side) -> &AxisPairSet {
        match side {
            Side::Node1 => &self.map1,
            Side::Node2 => &self.map2,
        }
    }

    fn subgraph(&self, side: Side) -> &'a Subgraph {
        match side {
            Side::Node1 => self.sg1,
            Side::Node2 => self.sg2,
        }
    }

    fn non_ref_map(&self) -> &AxisPairSet {
        self.map(self.reference.other())
    }

    fn non_ref_map_mut(&mut self) -> &mut AxisPairSet {
        match self.reference.other() {
            Side::Node1 => &mut self.map1,
            Side::Node2 => &mut self.map2,
        }
    }

    /// Map the axes of the producer/consumer link `node1.output -> node2.input`.
    ///
    /// Tries, in order: store descriptor against load descriptor (after re-applying the
    /// boundary view), store descriptor against the consumer's schedule, then schedule
    /// against schedule. A reduction producer must pass the first two.
    pub fn map_vertical(&mut self, output: usize, input: usize) -> Result<(), FusionError> {
        let store = self.sg1.output_desc(output)?;
        let load = self.sg2.input_desc(input)?;

        // Axis ids of the two kernels are unrelated yet, so only the broadcast part of
        // the boundary view is re-applied, position by position.
        let mut aligned = load.clone();
        apply_view(&mut aligned, &boundary_broadcast(load, store))?;
        let producer_desc = self.desc_seq(Side::Node1, store, |_, _| false);
        let tier1 = self.match_seqs(
            &producer_desc,
            &self.desc_seq(Side::Node2, &aligned, |_, _| false),
        );
        log::trace!("vertical {output}->{input}: desc/desc {tier1:?}");

        // Reduced and unit slots have no loop in the consumer.
        let reduced = self.sg1.reduce_axes();
        let producer_kept =
            self.desc_seq(Side::Node1, store, |a, r| r.is_one() || reduced.contains(&a));
        let consumer_sched = self.sched_seq(Side::Node2, |_| true)?;
        let reduction = self.sg1.fuse_type().contains(FuseType::REDUCTION);

        let candidate = if reduction {
            let tier2 = self.match_seqs(&producer_kept, &consumer_sched);
            log::trace!("vertical {output}->{input}: reduction desc/sched {tier2:?}");
            match (tier1, tier2) {
                (Some(mut a), Some(b)) => {
                    a.merge(&b)
                        .map_err(|_| RejectReason::ReductionAxesUnmappable)?;
                    a
                }
                _ => return Err(RejectReason::ReductionAxesUnmappable.into()),
            }
        } else if let Some(found) = tier1 {
            found
        } else if let Some(found) = self.match_seqs(&producer_kept, &consumer_sched) {
            log::trace!("vertical {output}->{input}: desc/sched {found:?}");
            found
        } else {
            let found = self.match_seqs(&self.sched_seq(Side::Node1, |_| true)?, &consumer_sched);
            log::trace!("vertical {output}->{input}: sched/sched {found:?}");
            found.ok_or(RejectReason::AxisSizesDisagree)?
        };
        self.commit(candidate)
    }

    /// Map the axes of the shared input `node1.inputs[i] == node2.inputs[j]`: load
    /// descriptor against load descriptor, else schedule against schedule.
    pub fn map_horizontal(&mut self, i: usize, j: usize) -> Result<(), FusionError> {
        let d1 = self.sg1.input_desc(i)?;
        let d2 = self.sg2.input_desc(j)?;
        let candidate = match self.match_seqs(
            &self.desc_seq(Side::Node1, d1, |_, _| false),
            &self.desc_seq(Side::Node2, d2, |_, _| false),
        ) {
            Some(found) => found,
            None => {
                let found = self.match_seqs(
                    &self.sched_seq(Side::Node1, |_| true)?,
                    &self.sched_seq(Side::Node2, |_| true)?,
                );
                log::trace!("horizontal {i}/{j}: sched/sched {found:?}");
                found.ok_or(RejectReason::AxisSizesDisagree)?
            }
        };
        self.commit(candidate)
    }

    /// Map the remaining schedule axes of the non-reference side onto unused reference
    /// schedule axes, then give every axis still unmapped a fresh id.
    pub fn complete(&mut self) -> Result<(), FusionError> {
        let side = self.reference.other();
        let pending = self.sched_seq(side, |a| !self.non_ref_map().contains(a))?;
        if !pending.axes.is_empty() {
            let free = self.sched_seq(self.reference, |a| {
                self.non_ref_map().source_of(a).is_none()
            })?;
            if let Some(found) = self.match_seqs(&pending, &free) {
                log::trace!("completing schedule {found:?}");
                self.non_ref_map_mut().merge(&found)?;
            }
        }

        let sg = self.subgraph(side);
        let mut next = self
            .map1
            .iter()
            .chain(self.map2.iter())
            .map(|(_, t)| t.0 + 1)
            .max()
            .unwrap_or(0);
        let unmapped: Vec<AxisId> = sg
            .sched_axes()
            .iter()
            .copied()
            .chain(sg.axes().iter().map(|a| a.id))
            .collect();
        for axis in unmapped {
            if !self.non_ref_map().contains(axis) {
                self.non_ref_map_mut().insert(axis, AxisId(next))?;
                next += 1;
            }
        }
        Ok(())
    }

    /// Both schedules rewritten through their maps. `None` before [`Self::complete`].
    pub fn mapped_sched(&self) -> Option<(RVec<AxisId>, RVec<AxisId>)> {
        Some((
            self.map1.apply(self.sg1.sched_axes())?,
            self.map2.apply(self.sg2.sched_axes())?,
        ))
    }

    /// The mapped schedules are equal, or one is an order-preserving subsequence of
    /// the other.
    pub fn can_loop_merge(&self) -> bool {
        match self.mapped_sched() {
            Some((l1, l2)) => is_loop_subsequence(&l1, &l2) || is_loop_subsequence(&l2, &l1),
            None => false,
        }
    }

    /// Final maps for node1 and node2, renumbered to a dense range.
    pub fn finish(self) -> (AxisPairSet, AxisPairSet) {
        flatten_to_contiguous_ids(&self.map1, &self.map2)
    }

    fn commit(&mut self, candidate: AxisPairSet) -> Result<(), FusionError> {
        if !self.non_ref_map().is_empty() && !is_same_map_axis(self.non_ref_map(), &candidate) {
            log::trace!("edge disagrees: {:?} vs {candidate:?}", self.non_ref_map());
            return Err(RejectReason::AxisMapInconsistent.into());
        }
        self.non_ref_map_mut().merge(&candidate)?;
        Ok(())
    }

    fn desc_seq(
        &self,
        side: Side,
        desc: &TensorDesc,
        skip: impl Fn(AxisId, &Expr) -> bool,
    ) -> Seq {
        let (axes, keys) = desc
            .axis
            .iter()
            .zip(desc.repeats.iter())
            .filter(|(a, r)| !skip(**a, r))
            .map(|(a, r)| (*a, r.clone()))
            .unzip();
        Seq { side, axes, keys }
    }

    fn sched_seq(&self, side: Side, keep: impl Fn(AxisId) -> bool) -> Result<Seq, InvariantError> {
        let sg = self.subgraph(side);
        let mut axes = RVec::new();
        let mut keys = RVec::new();
        for a in sg.sched_axes().iter().copied().filter(|a| keep(*a)) {
            keys.push(sg.axis_size(a)?.clone());
            axes.push(a);
        }
        Ok(Seq { side, axes, keys })
    }

    // (non-reference axis, reference axis) for a pair of axes from `x_side` and its
    // opposite.
    fn orient(&self, x_side: Side, x: AxisId, y: AxisId) -> (AxisId, AxisId) {
        if x_side == self.reference { (y, x) } else { (x, y) }
    }

    // A mapped axis only matches its committed target; a taken target only its source.
    fn admissible(&self, (from, to): (AxisId, AxisId)) -> bool {
        let map = self.non_ref_map();
        match map.get(from) {
            Some(t) => t == to,
            None => map.source_of(to).is_none(),
        }
    }

    fn match_seqs(&self, a: &Seq, b: &Seq) -> Option<AxisPairSet> {
        let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
        let pair = |i: usize, j: usize| self.orient(short.side, short.axes[i], long.axes[j]);
        let found = find_axis_index_by(short.len(), long.len(), |i, j| {
            short.keys[i] == long.keys[j] && self.admissible(pair(i, j))
        })?;
        let mut candidate = AxisPairSet::new();
        for (i, j) in found.into_iter().enumerate() {
            let (from, to) = pair(i, j);
            candidate.insert(from, to).ok()?;
        }
        Some(candidate)
    }
}

/// `short` appears in `long` in the same relative order.
pub fn is_loop_subsequence(short: &[AxisId], long: &[AxisId]) -> bool {
    let mut j = 0;
    for a in short {
        while j < long.len() && long[j] != *a {
            j += 1;
        }
        if j == long.len() {
            return false;
        }
        j += 1;
    }
    true
}
