use super::{FusePair, FusionStrategy};
use crate::{FuseType, FusionError, RejectReason};

/// Split and slice outputs never fuse forward. Split and slice kernels fuse side by
/// side, in any combination, only when they come from the same original split.
#[derive(Debug, Clone, Copy)]
pub struct SplitStrategy {
    bit: FuseType,
    name: &'static str,
}

impl SplitStrategy {
    pub fn split() -> Self {
        Self {
            bit: FuseType::SPLIT,
            name: "split",
        }
    }

    pub fn slice() -> Self {
        Self {
            bit: FuseType::SLICE,
            name: "slice",
        }
    }
}

impl FusionStrategy for SplitStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn can_fuse(&self, pair: &FusePair<'_>) -> Result<(), FusionError> {
        if pair.is_vertical() && pair.sg1().fuse_type().contains(self.bit) {
            return Err(RejectReason::SplitCannotFuseForward.into());
        }
        let splitting = FuseType::SPLIT | FuseType::SLICE;
        if pair.info.has_horizontal()
            && pair.sg1().fuse_type().intersects(splitting)
            && pair.sg2().fuse_type().intersects(splitting)
        {
            let (ours, theirs) = (pair.sg1().split_origins(), pair.sg2().split_origins());
            if ours.is_empty() || theirs.is_empty() {
                return Err(RejectReason::SplitOriginMissing.into());
            }
            if !ours.iter().any(|o| theirs.contains(o)) {
                return Err(RejectReason::SplitOriginMismatch.into());
            }
        }
        Ok(())
    }
}
