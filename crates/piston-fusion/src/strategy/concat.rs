use super::{FuseCap, FusePair, FusionStrategy};
use crate::{AxisId, FuseType, FusionConfig, FusionError, RejectReason};

/// Concatenation.
///
/// Never pairs with another concat or a reduction, only fuses forward into pointwise
/// consumers that read it without a view, and needs both kernels to iterate the same
/// number of loop axes. The concatenated axis may differ between the two loop nests, so
/// the generic loop-merge check is replaced by [`ConcatStrategy::can_merge_loop`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatStrategy;

impl FusionStrategy for ConcatStrategy {
    fn name(&self) -> &'static str {
        "concat"
    }

    fn can_fuse(&self, pair: &FusePair<'_>) -> Result<(), FusionError> {
        if pair.both(FuseType::CONCAT) {
            return Err(RejectReason::ConcatCannotFuseConcat.into());
        }
        if pair.either(FuseType::CONCAT) && pair.either(FuseType::REDUCTION) {
            return Err(RejectReason::ConcatCannotFuseReduction.into());
        }
        if pair.sg1().sched_axes().len() != pair.sg2().sched_axes().len() {
            return Err(RejectReason::ConcatSchedAxisCountMismatch.into());
        }
        if pair.is_vertical()
            && pair.sg1().fuse_type().contains(FuseType::CONCAT)
            && !pair.consumer_is_view_free_pointwise()?
        {
            return Err(RejectReason::ConcatRequiresViewFreePointwise.into());
        }
        Ok(())
    }

    /// Same depth, differing in at most the concatenated axis.
    fn can_merge_loop(&self, loop1: &[AxisId], loop2: &[AxisId]) -> bool {
        loop1.len() == loop2.len() && loop1.iter().zip(loop2).filter(|(a, b)| a != b).count() <= 1
    }

    fn max_fused_input_count(&self, _config: &FusionConfig) -> FuseCap {
        FuseCap::Unlimited
    }

    fn check_same_sched_axis(&self) -> bool {
        false
    }
}
