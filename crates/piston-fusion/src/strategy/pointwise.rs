use super::{FusionPriority, FusionStrategy};

/// Elementwise kernels fuse with anything the other strategies allow.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointwiseStrategy;

impl FusionStrategy for PointwiseStrategy {
    fn name(&self) -> &'static str {
        "pointwise"
    }

    fn priority(&self) -> FusionPriority {
        FusionPriority::High
    }
}
