use super::{FusePair, FusionStrategy};
use crate::{FuseType, FusionError, RejectReason};

/// Reductions take a bounded pointwise epilogue and nothing else downstream.
///
/// The epilogue already fused into the producer counts towards
/// [`FusionConfig::max_reduce_backward_fuse_count`](crate::FusionConfig).
#[derive(Debug, Clone, Copy, Default)]
pub struct ReduceStrategy;

impl FusionStrategy for ReduceStrategy {
    fn name(&self) -> &'static str {
        "reduce"
    }

    fn can_fuse(&self, pair: &FusePair<'_>) -> Result<(), FusionError> {
        if !pair.is_vertical() {
            return Ok(());
        }
        let producer = pair.sg1().fuse_type().contains(FuseType::REDUCTION);
        let consumer = pair.sg2().fuse_type().contains(FuseType::REDUCTION);
        if producer && consumer {
            return Err(RejectReason::ReductionCannotFuseReduction.into());
        }
        if !producer {
            return Ok(());
        }
        if !pair.sg2().fuse_type().is_pointwise_only() {
            return Err(RejectReason::ReductionRequiresPointwiseConsumer.into());
        }
        let chain = pair.sg1().reduce_epilogue_len() + pair.consumer_pointwise_count();
        if chain > pair.config.max_reduce_backward_fuse_count {
            log::debug!(
                "reduction epilogue of {} would reach {chain} ops (cap {})",
                pair.node1.name,
                pair.config.max_reduce_backward_fuse_count
            );
            return Err(RejectReason::ReductionExceedsBackwardFuseBudget.into());
        }
        Ok(())
    }
}
