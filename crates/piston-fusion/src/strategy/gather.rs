use super::{FusePair, FusionStrategy};
use crate::{FuseType, FusionError, RejectReason};

/// Gather never consumes another gather. A broadcast of the innermost axis across the
/// boundary needs [`TargetCapabilities::gather_trailing_broadcast`](crate::TargetCapabilities).
#[derive(Debug, Clone, Copy, Default)]
pub struct GatherStrategy;

impl FusionStrategy for GatherStrategy {
    fn name(&self) -> &'static str {
        "gather"
    }

    fn can_fuse(&self, pair: &FusePair<'_>) -> Result<(), FusionError> {
        if !pair.is_vertical() {
            return Ok(());
        }
        if pair.both(FuseType::GATHER) {
            return Err(RejectReason::GatherCannotConsumeGather.into());
        }
        if !pair.config.capabilities.gather_trailing_broadcast && pair.has_trailing_broadcast()? {
            return Err(RejectReason::GatherTrailingBroadcastUnsupported.into());
        }
        Ok(())
    }
}
