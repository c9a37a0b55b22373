/// Per-target features some strategies depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TargetCapabilities {
    /// Gather may be fused with a broadcast of its innermost axis.
    pub gather_trailing_broadcast: bool,
}

/// Caps and capability flags read by the fusion decider and its strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionConfig {
    /// Compute ops a fused kernel may hold.
    pub max_fused_node_count: usize,
    /// Distinct inputs a fused kernel may read.
    pub max_fused_input_count: usize,
    /// Pointwise ops a reduction may absorb as its epilogue.
    pub max_reduce_backward_fuse_count: usize,
    pub capabilities: TargetCapabilities,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            max_fused_node_count: 64,
            max_fused_input_count: 16,
            max_reduce_backward_fuse_count: 3,
            capabilities: TargetCapabilities::default(),
        }
    }
}

impl FusionConfig {
    /// Defaults, overridden by `PISTON_FUSION_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let count = |key: &str, default: usize| match lookup(key) {
            Some(s) => s.trim().parse::<usize>().unwrap_or_else(|_| {
                log::warn!("Ignoring {key}={s:?}: not a count");
                default
            }),
            None => default,
        };
        config.max_fused_node_count = count("PISTON_FUSION_MAX_NODES", config.max_fused_node_count);
        config.max_fused_input_count =
            count("PISTON_FUSION_MAX_INPUTS", config.max_fused_input_count);
        config.max_reduce_backward_fuse_count = count(
            "PISTON_FUSION_MAX_REDUCE_CHAIN",
            config.max_reduce_backward_fuse_count,
        );
        config.capabilities.gather_trailing_broadcast =
            match lookup("PISTON_FUSION_GATHER_TRAILING_BROADCAST") {
                Some(s) => !s.is_empty() && s != "0",
                None => false,
            };
        config
    }

    pub fn with_max_reduce_backward_fuse_count(mut self, count: usize) -> Self {
        self.max_reduce_backward_fuse_count = count;
        self
    }

    pub fn with_capabilities(mut self, capabilities: TargetCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_defaults() {
        let config = FusionConfig::from_lookup(lookup(&[]));
        assert_eq!(config, FusionConfig::default());
        assert_eq!(config.max_reduce_backward_fuse_count, 3);
        assert!(!config.capabilities.gather_trailing_broadcast);
    }

    #[test]
    fn test_overrides() {
        let config = FusionConfig::from_lookup(lookup(&[
            ("PISTON_FUSION_MAX_NODES", "8"),
            ("PISTON_FUSION_MAX_REDUCE_CHAIN", " 5 "),
            ("PISTON_FUSION_GATHER_TRAILING_BROADCAST", "1"),
        ]));
        assert_eq!(config.max_fused_node_count, 8);
        assert_eq!(config.max_fused_input_count, 16);
        assert_eq!(config.max_reduce_backward_fuse_count, 5);
        assert!(config.capabilities.gather_trailing_broadcast);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = FusionConfig::from_lookup(lookup(&[
            ("PISTON_FUSION_MAX_INPUTS", "lots"),
            ("PISTON_FUSION_GATHER_TRAILING_BROADCAST", "0"),
        ]));
        assert_eq!(config.max_fused_input_count, 16);
        assert!(!config.capabilities.gather_trailing_broadcast);
    }
}
