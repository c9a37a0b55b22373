//! # Fusion strategies
//!
//! One policy object per operator category. A candidate pair is checked against every
//! strategy whose category either kernel exercises, plus an always-present default:
//!
//! - legality is the AND of all matching strategies; the first rejection, in
//!   registration order, is the one reported
//! - size caps are the MAX across matching strategies, and any unlimited cap wins
//! - priority is only a search-ordering hint
//!
//! The registry is built once and then only read.

mod concat;
mod cube;
mod default;
mod gather;
mod pointwise;
mod reduce;
mod split;

pub use concat::*;
pub use cube::*;
pub use default::*;
pub use gather::*;
pub use pointwise::*;
pub use reduce::*;
pub use split::*;

use crate::{
    AxisId, ConnectivityInfo, FuseType, FusionConfig, FusionError, FusionGraph, InvariantError,
    KernelNode, OpKind, Subgraph, boundary_broadcast, is_simplest_load,
};

/// Search-ordering hint. Higher is tried first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum FusionPriority {
    #[default]
    Low,
    Normal,
    High,
}

/// A size cap contributed by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuseCap {
    Limited(usize),
    Unlimited,
}

impl FuseCap {
    pub fn max(self, other: FuseCap) -> FuseCap {
        match (self, other) {
            (FuseCap::Limited(a), FuseCap::Limited(b)) => FuseCap::Limited(a.max(b)),
            _ => FuseCap::Unlimited,
        }
    }

    pub fn allows(self, n: usize) -> bool {
        match self {
            FuseCap::Limited(cap) => n <= cap,
            FuseCap::Unlimited => true,
        }
    }
}

/// A candidate pair as the strategies see it. `node1` is the producer side.
#[derive(Debug, Clone, Copy)]
pub struct FusePair<'a> {
    pub graph: &'a FusionGraph,
    pub node1: &'a KernelNode,
    pub node2: &'a KernelNode,
    pub info: &'a ConnectivityInfo,
    pub config: &'a FusionConfig,
}

impl<'a> FusePair<'a> {
    pub fn sg1(&self) -> &'a Subgraph {
        &self.node1.body
    }

    pub fn sg2(&self) -> &'a Subgraph {
        &self.node2.body
    }

    /// Categories exercised by either kernel.
    pub fn fuse_type(&self) -> FuseType {
        self.sg1().fuse_type() | self.sg2().fuse_type()
    }

    pub fn is_vertical(&self) -> bool {
        self.info.has_vertical()
    }

    pub fn is_horizontal_only(&self) -> bool {
        !self.info.has_vertical()
    }

    /// Either kernel exercises `bit`.
    pub fn either(&self, bit: FuseType) -> bool {
        self.sg1().fuse_type().contains(bit) || self.sg2().fuse_type().contains(bit)
    }

    pub fn both(&self, bit: FuseType) -> bool {
        self.sg1().fuse_type().contains(bit) && self.sg2().fuse_type().contains(bit)
    }

    /// Every producer/consumer link crosses its boundary without a view.
    pub fn links_simplest(&self) -> Result<bool, InvariantError> {
        for &(output, input) in &self.info.vertical {
            let store = self.sg1().output_desc(output)?;
            let load = self.sg2().input_load(input)?;
            let load_desc = self.sg2().input_desc(input)?;
            let followed = self.sg2().broadcast_after(load).is_some();
            if !is_simplest_load(load_desc, store, followed) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The consumer only does pointwise work and reads node1 without any view.
    pub fn consumer_is_view_free_pointwise(&self) -> Result<bool, InvariantError> {
        Ok(self.sg2().fuse_type().is_pointwise_only() && self.links_simplest()?)
    }

    /// Some producer/consumer link broadcasts the consumer's innermost axis, either
    /// through the boundary descriptors or a `Broadcast` op right after the load.
    pub fn has_trailing_broadcast(&self) -> Result<bool, InvariantError> {
        for &(output, input) in &self.info.vertical {
            let store = self.sg1().output_desc(output)?;
            let load_desc = self.sg2().input_desc(input)?;
            let view = boundary_broadcast(load_desc, store);
            if load_desc.rank() > 0 && view.broadcasts_position(load_desc.rank() - 1) {
                return Ok(true);
            }
            let load = self.sg2().input_load(input)?;
            if let Some(bcast) = self.sg2().broadcast_after(load)
                && let Some(out) = bcast.outputs.first()
                && out.repeats.last() != load_desc.repeats.last()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Pointwise ops in the consumer.
    pub fn consumer_pointwise_count(&self) -> usize {
        self.sg2().count(OpKind::Pointwise)
    }
}

/// Legality policy for one operator category.
pub trait FusionStrategy: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn can_fuse(&self, _pair: &FusePair<'_>) -> Result<(), FusionError> {
        Ok(())
    }

    /// Veto on the final, mapped loop nests of both kernels.
    fn can_merge_loop(&self, _loop1: &[AxisId], _loop2: &[AxisId]) -> bool {
        true
    }

    fn priority(&self) -> FusionPriority {
        FusionPriority::Normal
    }

    fn max_fused_node_count(&self, config: &FusionConfig) -> FuseCap {
        FuseCap::Limited(config.max_fused_node_count)
    }

    fn max_fused_input_count(&self, config: &FusionConfig) -> FuseCap {
        FuseCap::Limited(config.max_fused_input_count)
    }

    /// Skip shared-input axis mapping when the pair also has producer/consumer links.
    fn only_vertical_mapping(&self) -> bool {
        false
    }

    /// Require the mapped loop nests to be equal or nested subsequences.
    fn check_same_sched_axis(&self) -> bool {
        true
    }
}

/// Strategies keyed by category bit, in registration order.
#[derive(Debug)]
pub struct StrategyRegistry {
    entries: Vec<(FuseType, Box<dyn FusionStrategy>)>,
    default: Box<dyn FusionStrategy>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl StrategyRegistry {
    /// A registry holding only the permissive default.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            default: Box::new(DefaultStrategy),
        }
    }

    /// All built-in strategies.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register(FuseType::CONCAT, ConcatStrategy)
            .register(FuseType::CUBE, CubeStrategy)
            .register(FuseType::GATHER, GatherStrategy)
            .register(FuseType::SPLIT, SplitStrategy::split())
            .register(FuseType::SLICE, SplitStrategy::slice())
            .register(FuseType::REDUCTION, ReduceStrategy)
            .register(FuseType::POINTWISE, PointwiseStrategy);
        registry
    }

    pub fn register(
        &mut self,
        bit: FuseType,
        strategy: impl FusionStrategy + 'static,
    ) -> &mut Self {
        self.entries.push((bit, Box::new(strategy)));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every strategy whose bit is in `mask`, then the default.
    pub fn get(&self, mask: FuseType) -> StrategySet<'_> {
        let strategies = self
            .entries
            .iter()
            .filter(|(bit, _)| mask.intersects(*bit))
            .map(|(_, s)| s.as_ref())
            .chain(std::iter::once(self.default.as_ref()))
            .collect();
        StrategySet { strategies }
    }
}

/// The strategies matching one pair, with the aggregation rules applied.
#[derive(Debug)]
pub struct StrategySet<'a> {
    strategies: Vec<&'a dyn FusionStrategy>,
}

impl StrategySet<'_> {
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Fails with the first rejection.
    pub fn can_fuse(&self, pair: &FusePair<'_>) -> Result<(), FusionError> {
        for strategy in &self.strategies {
            if let Err(e) = strategy.can_fuse(pair) {
                log::debug!(
                    "{} rejects {} + {}: {e}",
                    strategy.name(),
                    pair.node1.name,
                    pair.node2.name
                );
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn can_merge_loop(&self, loop1: &[AxisId], loop2: &[AxisId]) -> bool {
        self.strategies
            .iter()
            .all(|s| s.can_merge_loop(loop1, loop2))
    }

    pub fn priority(&self) -> FusionPriority {
        self.strategies
            .iter()
            .map(|s| s.priority())
            .max()
            .unwrap_or_default()
    }

    pub fn max_fused_node_count(&self, config: &FusionConfig) -> FuseCap {
        self.strategies
            .iter()
            .map(|s| s.max_fused_node_count(config))
            .fold(FuseCap::Limited(0), FuseCap::max)
    }

    pub fn max_fused_input_count(&self, config: &FusionConfig) -> FuseCap {
        self.strategies
            .iter()
            .map(|s| s.max_fused_input_count(config))
            .fold(FuseCap::Limited(0), FuseCap::max)
    }

    pub fn only_vertical_mapping(&self) -> bool {
        self.strategies.iter().any(|s| s.only_vertical_mapping())
    }

    pub fn check_same_sched_axis(&self) -> bool {
        self.strategies.iter().all(|s| s.check_same_sched_axis())
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use crate::{OpAttr, RejectReason, analyze};

    #[derive(Debug)]
    struct Veto;

    impl FusionStrategy for Veto {
        fn name(&self) -> &'static str {
            "veto"
        }

        fn can_fuse(&self, _pair: &FusePair<'_>) -> Result<(), FusionError> {
            Err(RejectReason::LoopMergeMismatch.into())
        }

        fn max_fused_input_count(&self, _config: &FusionConfig) -> FuseCap {
            FuseCap::Unlimited
        }
    }

    #[test]
    fn test_get_filters_by_mask_and_appends_default() {
        let registry = StrategyRegistry::with_builtin();
        let set = registry.get(FuseType::REDUCTION | FuseType::POINTWISE);
        assert_eq!(set.names(), vec!["reduce", "pointwise", "default"]);
        assert_eq!(registry.get(FuseType::EMPTY).names(), vec!["default"]);
    }

    #[test]
    fn test_caps_take_max() {
        let config = FusionConfig::default();
        let mut registry = StrategyRegistry::new();
        registry.register(FuseType::POINTWISE, PointwiseStrategy);
        let set = registry.get(FuseType::POINTWISE);
        assert_eq!(set.max_fused_input_count(&config), FuseCap::Limited(16));
        assert_eq!(set.priority(), FusionPriority::High);

        registry.register(FuseType::POINTWISE, Veto);
        let set = registry.get(FuseType::POINTWISE);
        assert_eq!(set.max_fused_input_count(&config), FuseCap::Unlimited);
        assert_eq!(set.max_fused_node_count(&config), FuseCap::Limited(64));
    }

    #[test]
    fn test_any_rejection_rejects() -> anyhow::Result<()> {
        let (graph, a, b) = chain(
            body("a", 1, &[(OpKind::Pointwise, OpAttr::None)]),
            body("b", 1, &[(OpKind::Pointwise, OpAttr::None)]),
        );
        let info = analyze(&graph, a, b)?;
        let config = FusionConfig::default();
        let pair = FusePair {
            graph: &graph,
            node1: graph.node(a)?,
            node2: graph.node(b)?,
            info: &info,
            config: &config,
        };
        assert!(pair.consumer_is_view_free_pointwise()?);

        let mut registry = StrategyRegistry::with_builtin();
        assert!(registry.get(pair.fuse_type()).can_fuse(&pair).is_ok());
        registry.register(FuseType::POINTWISE, Veto);
        let err = registry.get(pair.fuse_type()).can_fuse(&pair).unwrap_err();
        assert_eq!(err.rejection(), Some(RejectReason::LoopMergeMismatch));
        Ok(())
    }

    #[test]
    fn test_cap_max() {
        assert_eq!(
            FuseCap::Limited(3).max(FuseCap::Limited(5)),
            FuseCap::Limited(5)
        );
        assert_eq!(FuseCap::Limited(3).max(FuseCap::Unlimited), FuseCap::Unlimited);
        assert!(FuseCap::Limited(3).allows(3));
        assert!(!FuseCap::Limited(3).allows(4));
    }
}
