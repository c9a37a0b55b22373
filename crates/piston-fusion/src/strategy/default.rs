use super::{FusionPriority, FusionStrategy};

/// Always matched. Accepts everything and contributes the configured caps.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStrategy;

impl FusionStrategy for DefaultStrategy {
    fn name(&self) -> &'static str {
        "default"
    }

    fn priority(&self) -> FusionPriority {
        FusionPriority::Low
    }
}
