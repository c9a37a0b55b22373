use crate::{AxisId, KernelId, OpId};

/// Why a candidate pair may not be fused.
///
/// Expected, recoverable outcome: the search driver moves on to another pair.
/// [`RejectReason::code`] is stable and meant for matching and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, thiserror::Error)]
pub enum RejectReason {
    #[error("nodes share no input and have no producer/consumer edge")]
    NoRelation,
    #[error("nodes are connected through a third kernel; fusing them would create a cycle")]
    WouldCreateCycle,
    #[error("fused kernel would exceed the node count cap")]
    FusedNodeCountExceeded,
    #[error("fused kernel would exceed the input count cap")]
    FusedInputCountExceeded,
    #[error("element type differs across a load/store boundary")]
    BoundaryDTypeMismatch,

    #[error("concat cannot fuse with another concat")]
    ConcatCannotFuseConcat,
    #[error("concat cannot fuse with a reduction")]
    ConcatCannotFuseReduction,
    #[error("concat only fuses into view-free pointwise consumers")]
    ConcatRequiresViewFreePointwise,
    #[error("concat requires both kernels to have the same number of schedule axes")]
    ConcatSchedAxisCountMismatch,

    #[error("reduction cannot feed another reduction")]
    ReductionCannotFuseReduction,
    #[error("reduction only fuses forward into pointwise consumers")]
    ReductionRequiresPointwiseConsumer,
    #[error("reduction would exceed its pointwise epilogue budget")]
    ReductionExceedsBackwardFuseBudget,
    #[error("reduction output axes do not map onto the consumer loop axes")]
    ReductionAxesUnmappable,

    #[error("matmul cannot consume another kernel's output")]
    CubeCannotConsume,
    #[error("matmul only fuses into view-free pointwise consumers")]
    CubeRequiresViewFreePointwise,
    #[error("matmul does not fuse horizontally")]
    CubeHorizontalUnsupported,

    #[error("gather cannot consume another gather")]
    GatherCannotConsumeGather,
    #[error("target does not support a trailing broadcast around gather")]
    GatherTrailingBroadcastUnsupported,

    #[error("split/slice output cannot fuse forward")]
    SplitCannotFuseForward,
    #[error("split/slice kernels trace back to different original splits")]
    SplitOriginMismatch,
    #[error("split/slice kernel does not record the split it came from")]
    SplitOriginMissing,

    #[error("no axis correspondence found at any matching tier")]
    AxisSizesDisagree,
    #[error("axis correspondence disagrees between edges of the same pair")]
    AxisMapInconsistent,
    #[error("loop axes cannot share one loop nest")]
    LoopMergeMismatch,
    #[error("a fusion strategy refused to merge the loop nests")]
    StrategyLoopMergeRejected,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::NoRelation => "no-relation",
            RejectReason::WouldCreateCycle => "fusion-would-create-cycle",
            RejectReason::FusedNodeCountExceeded => "fused-node-count-exceeded",
            RejectReason::FusedInputCountExceeded => "fused-input-count-exceeded",
            RejectReason::BoundaryDTypeMismatch => "boundary-dtype-mismatch",
            RejectReason::ConcatCannotFuseConcat => "concat-cannot-fuse-concat",
            RejectReason::ConcatCannotFuseReduction => "concat-cannot-fuse-reduction",
            RejectReason::ConcatRequiresViewFreePointwise => "concat-requires-view-free-pointwise",
            RejectReason::ConcatSchedAxisCountMismatch => "concat-sched-axis-count-mismatch",
            RejectReason::ReductionCannotFuseReduction => "reduction-cannot-fuse-reduction",
            RejectReason::ReductionRequiresPointwiseConsumer => {
                "reduction-requires-pointwise-consumer"
            }
            RejectReason::ReductionExceedsBackwardFuseBudget => {
                "reduction-exceeds-backward-fuse-budget"
            }
            RejectReason::ReductionAxesUnmappable => "reduction-axes-unmappable",
            RejectReason::CubeCannotConsume => "cube-cannot-consume",
            RejectReason::CubeRequiresViewFreePointwise => "cube-requires-view-free-pointwise",
            RejectReason::CubeHorizontalUnsupported => "cube-horizontal-unsupported",
            RejectReason::GatherCannotConsumeGather => "gather-cannot-consume-gather",
            RejectReason::GatherTrailingBroadcastUnsupported => {
                "gather-trailing-broadcast-unsupported"
            }
            RejectReason::SplitCannotFuseForward => "split-cannot-fuse-forward",
            RejectReason::SplitOriginMismatch => "split-origin-mismatch",
            RejectReason::SplitOriginMissing => "split-origin-missing",
            RejectReason::AxisSizesDisagree => "axis-sizes-disagree",
            RejectReason::AxisMapInconsistent => "axis-map-inconsistent",
            RejectReason::LoopMergeMismatch => "loop-merge-mismatch",
            RejectReason::StrategyLoopMergeRejected => "strategy-loop-merge-rejected",
        }
    }
}

/// Malformed input. Analysis stops immediately and names the offending node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantError {
    #[error("Kernel {0:?} does not exist in the fusion graph.")]
    UnknownKernel(KernelId),
    #[error("Op {op:?} does not exist in subgraph {subgraph}.")]
    UnknownOp { subgraph: String, op: OpId },
    #[error("Kernel {0:?} is a graph input and cannot be fused.")]
    NotAKernel(KernelId),
    #[error("Cannot fuse kernel {0:?} with itself.")]
    SelfFusion(KernelId),
    #[error(
        "Descriptor of {node} has mismatched lengths: {axes} axes, {repeats} repeats, {strides} strides."
    )]
    DescLengthMismatch {
        node: String,
        axes: usize,
        repeats: usize,
        strides: usize,
    },
    #[error("{node} references axis {axis:?}, which is not declared in {subgraph}.")]
    UndeclaredAxis {
        subgraph: String,
        node: String,
        axis: AxisId,
    },
    #[error("Duplicate axis {axis:?} in {node}.")]
    DuplicateAxis { node: String, axis: AxisId },
    #[error("Input {index} of {subgraph} is not read by a Load.")]
    MissingInputLoad { subgraph: String, index: usize },
    #[error("Output {index} of {subgraph} is not written by a Store.")]
    MissingOutputStore { subgraph: String, index: usize },
    #[error("{subgraph} has no {kind} with index {index}.")]
    MissingBoundary {
        subgraph: String,
        kind: &'static str,
        index: usize,
    },
    #[error("Wrong input arity for {node}. Expected {expected}, got {actual}.")]
    InputArity {
        node: String,
        expected: usize,
        actual: usize,
    },
    #[error("Port {index} of {node} is out of range ({len} ports).")]
    PortOutOfRange {
        node: String,
        index: usize,
        len: usize,
    },
    #[error("View references axis {0:?}, which the descriptor does not carry.")]
    ViewAxisMissing(AxisId),
    #[error("View transpose swap ({0}, {1}) is out of range.")]
    ViewSwapOutOfRange(usize, usize),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FusionError {
    #[error("fusion rejected: {} ({0})", .0.code())]
    Rejected(#[from] RejectReason),
    #[error(transparent)]
    Invariant(#[from] InvariantError),
}

impl FusionError {
    pub fn rejection(&self) -> Option<RejectReason> {
        match self {
            FusionError::Rejected(reason) => Some(*reason),
            FusionError::Invariant(_) => None,
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, FusionError::Rejected(_))
    }
}
