use super::{FusePair, FusionStrategy};
use crate::{FuseType, FusionError, RejectReason};

/// Matmul and other cube-unit kernels only take a view-free pointwise epilogue.
#[derive(Debug, Clone, Copy, Default)]
pub struct CubeStrategy;

impl FusionStrategy for CubeStrategy {
    fn name(&self) -> &'static str {
        "cube"
    }

    fn can_fuse(&self, pair: &FusePair<'_>) -> Result<(), FusionError> {
        if pair.is_horizontal_only() {
            return Err(RejectReason::CubeHorizontalUnsupported.into());
        }
        if pair.sg2().fuse_type().contains(FuseType::CUBE) {
            return Err(RejectReason::CubeCannotConsume.into());
        }
        if !pair.consumer_is_view_free_pointwise()? {
            return Err(RejectReason::CubeRequiresViewFreePointwise.into());
        }
        Ok(())
    }

    fn only_vertical_mapping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_utils::*;
    use crate::{FusionConfig, FusionGraph, KernelId, OpAttr, OpKind, analyze};

    const CUBE: (OpKind, OpAttr) = (OpKind::Cube, OpAttr::None);
    const PW: (OpKind, OpAttr) = (OpKind::Pointwise, OpAttr::None);

    fn check((graph, a, b): (FusionGraph, KernelId, KernelId)) -> Option<RejectReason> {
        let info = analyze(&graph, a, b).unwrap();
        let config = FusionConfig::default();
        let pair = FusePair {
            graph: &graph,
            node1: graph.node(a).unwrap(),
            node2: graph.node(b).unwrap(),
            info: &info,
            config: &config,
        };
        CubeStrategy.can_fuse(&pair).err().and_then(|e| e.rejection())
    }

    #[test]
    fn test_cube_epilogue() {
        assert_eq!(check(chain(body("mm", 1, &[CUBE]), body("relu", 1, &[PW]))), None);
    }

    #[test]
    fn test_cube_never_consumes() {
        assert_eq!(
            check(chain(body("relu", 1, &[PW]), body("mm", 1, &[CUBE]))),
            Some(RejectReason::CubeCannotConsume)
        );
    }

    #[test]
    fn test_cube_horizontal() {
        assert_eq!(
            check(siblings(body("mm", 1, &[CUBE]), body("relu", 1, &[PW]))),
            Some(RejectReason::CubeHorizontalUnsupported)
        );
    }

    #[test]
    fn test_cube_into_broadcast() {
        assert_eq!(
            check(chain(
                body("mm", 1, &[CUBE]),
                body("bcast", 1, &[(OpKind::Broadcast, OpAttr::None), PW])
            )),
            Some(RejectReason::CubeRequiresViewFreePointwise)
        );
    }
}
