//! Fusion decision for one candidate pair.

use std::collections::BTreeMap;

use crate::{
    AxisPairSet, AxisSolver, ConnectivityInfo, FusePair, FusionConfig, FusionError, FusionGraph,
    FusionPriority, InvariantError, KernelId, RejectReason, StrategyRegistry, ViewOpAttrInfo,
    analyze, back_step, is_simplest_load,
};

/// How one producer/consumer link crosses its boundary, in the fused axis space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkView {
    /// Output of `node1`.
    pub output: usize,
    /// Input of `node2`.
    pub input: usize,
    /// The load/store pair can be dropped without re-applying a view.
    pub simplest: bool,
    /// The output is read outside the pair, so its store must survive the merge.
    pub keep_store: bool,
    /// View to re-apply with [`apply_view`](crate::apply_view) once the pair is dropped.
    pub view: ViewOpAttrInfo,
}

/// An approved fusion. Nothing has been mutated; the caller applies the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionPlan {
    /// Producer side of every vertical link.
    pub node1: KernelId,
    pub node2: KernelId,
    /// The pair was handed over as `(node2, node1)`.
    pub swapped: bool,
    /// Axis renaming of `node1`, dense over both maps.
    pub map1: AxisPairSet,
    /// Axis renaming of `node2`.
    pub map2: AxisPairSet,
    pub connectivity: ConnectivityInfo,
    /// One entry per producer/consumer link, in link order.
    pub views: Vec<LinkView>,
    pub priority: FusionPriority,
}

impl FusionPlan {
    pub fn is_vertical(&self) -> bool {
        self.connectivity.has_vertical()
    }
}

/// Decides whether two kernels may be merged.
///
/// Checks run in order: connectivity, cycle guard, strategy legality, size caps,
/// boundary and shared-input element types, axis correspondence, loop merge. The first failure is
/// returned. Decisions are independent of each other and never touch the graph.
#[derive(Debug, Clone, Copy)]
pub struct FusionDecider<'a> {
    registry: &'a StrategyRegistry,
    config: &'a FusionConfig,
}

impl<'a> FusionDecider<'a> {
    pub fn new(registry: &'a StrategyRegistry, config: &'a FusionConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &FusionConfig {
        self.config
    }

    /// Decide on the pair `a`, `b` in either order.
    pub fn decide(
        &self,
        graph: &FusionGraph,
        a: KernelId,
        b: KernelId,
    ) -> Result<FusionPlan, FusionError> {
        let result = self.try_decide(graph, a, b);
        match &result {
            Ok(plan) => log::debug!(
                "fuse {:?} + {:?}: approved, {} shared inputs, {} links",
                plan.node1,
                plan.node2,
                plan.connectivity.same_inputs.len(),
                plan.views.len()
            ),
            Err(FusionError::Rejected(reason)) => {
                log::debug!("fuse {a:?} + {b:?}: rejected ({})", reason.code())
            }
            Err(FusionError::Invariant(e)) => log::warn!("fuse {a:?} + {b:?}: {e}"),
        }
        result
    }

    /// Decide on every candidate. Rejections are counted; an invariant violation stops
    /// the run.
    pub fn decide_all(
        &self,
        graph: &FusionGraph,
        candidates: &[(KernelId, KernelId)],
    ) -> Result<(Vec<FusionPlan>, FusionStats), InvariantError> {
        let mut plans = Vec::new();
        let mut stats = FusionStats::default();
        for &(a, b) in candidates {
            match self.decide(graph, a, b) {
                Ok(plan) => {
                    stats.record_approval();
                    plans.push(plan);
                }
                Err(FusionError::Rejected(reason)) => stats.record_rejection(reason),
                Err(FusionError::Invariant(e)) => return Err(e),
            }
        }
        Ok((plans, stats))
    }

    fn try_decide(
        &self,
        graph: &FusionGraph,
        a: KernelId,
        b: KernelId,
    ) -> Result<FusionPlan, FusionError> {
        if a == b {
            return Err(InvariantError::SelfFusion(a).into());
        }
        let swapped = graph.node(a)?.inputs.iter().any(|p| p.node == b)
            && !graph.node(b)?.inputs.iter().any(|p| p.node == a);
        let (node1, node2) = if swapped { (b, a) } else { (a, b) };

        let info = analyze(graph, node1, node2)?;
        if graph.reaches_through_other(node1, node2) || graph.reaches_through_other(node2, node1)
        {
            return Err(RejectReason::WouldCreateCycle.into());
        }

        let pair = FusePair {
            graph,
            node1: graph.node(node1)?,
            node2: graph.node(node2)?,
            info: &info,
            config: self.config,
        };
        let (sg1, sg2) = (pair.sg1(), pair.sg2());
        let strategies = self.registry.get(pair.fuse_type());
        log::trace!(
            "{} + {}: strategies {:?}",
            pair.node1.name,
            pair.node2.name,
            strategies.names()
        );
        strategies.can_fuse(&pair)?;

        let nodes = sg1.compute_node_count() + sg2.compute_node_count();
        if !strategies.max_fused_node_count(self.config).allows(nodes) {
            return Err(RejectReason::FusedNodeCountExceeded.into());
        }
        if !strategies
            .max_fused_input_count(self.config)
            .allows(info.merged_input_count())
        {
            return Err(RejectReason::FusedInputCountExceeded.into());
        }
        for &(output, input) in &info.vertical {
            if sg1.output_desc(output)?.dtype != sg2.input_desc(input)?.dtype {
                return Err(RejectReason::BoundaryDTypeMismatch.into());
            }
        }
        // a shared input is loaded once in the merged kernel
        for &(i, j) in &info.same_inputs {
            let source = graph.port_dtype(pair.node1.inputs[i])?;
            if sg1.input_desc(i)?.dtype != source || sg2.input_desc(j)?.dtype != source {
                return Err(RejectReason::BoundaryDTypeMismatch.into());
            }
        }

        let mut solver = AxisSolver::new(sg1, sg2);
        for &(output, input) in &info.vertical {
            solver.map_vertical(output, input)?;
        }
        if !(strategies.only_vertical_mapping() && info.has_vertical()) {
            for &(i, j) in &info.same_inputs {
                solver.map_horizontal(i, j)?;
            }
        }
        solver.complete()?;
        if strategies.check_same_sched_axis() && !solver.can_loop_merge() {
            return Err(RejectReason::LoopMergeMismatch.into());
        }

        let (map1, map2) = solver.finish();
        let loop1 = map1
            .apply(sg1.sched_axes())
            .ok_or(RejectReason::AxisMapInconsistent)?;
        let loop2 = map2
            .apply(sg2.sched_axes())
            .ok_or(RejectReason::AxisMapInconsistent)?;
        if !strategies.can_merge_loop(&loop1, &loop2) {
            return Err(RejectReason::StrategyLoopMergeRejected.into());
        }

        let mut views = Vec::with_capacity(info.vertical.len());
        for &(output, input) in &info.vertical {
            let store = sg1.output_desc(output)?.map_axes(|a| map1.get(a));
            let load = sg2.input_desc(input)?.map_axes(|a| map2.get(a));
            let followed = sg2.broadcast_after(sg2.input_load(input)?).is_some();
            views.push(LinkView {
                output,
                input,
                simplest: is_simplest_load(&load, &store, followed),
                keep_store: info.node1_multi_ref[output],
                view: back_step(&load, &store),
            });
        }

        Ok(FusionPlan {
            node1,
            node2,
            swapped,
            map1,
            map2,
            priority: strategies.priority(),
            connectivity: info,
            views,
        })
    }
}

/// Outcome counts over a batch of decisions.
#[derive(Debug, Clone, Default)]
pub struct FusionStats {
    pub candidates: usize,
    pub approved: usize,
    pub rejected: usize,
    /// Rejections per reason code
    pub reasons: BTreeMap<&'static str, usize>,
}

impl FusionStats {
    pub fn record_approval(&mut self) {
        self.candidates += 1;
        self.approved += 1;
    }

    pub fn record_rejection(&mut self, reason: RejectReason) {
        self.candidates += 1;
        self.rejected += 1;
        *self.reasons.entry(reason.code()).or_default() += 1;
    }
}

impl std::fmt::Display for FusionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Fusion Decisions:")?;
        writeln!(f, "  Candidates: {}", self.candidates)?;
        writeln!(f, "  Approved:   {}", self.approved)?;
        writeln!(f, "  Rejected:   {}", self.rejected)?;
        for (code, count) in &self.reasons {
            writeln!(f, "    {code}: {count}")?;
        }
        Ok(())
    }
}
