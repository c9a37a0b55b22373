//! Operator categories and the fuse-type bitmask.

use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Category of a node inside a kernel subgraph.
///
/// `Data`, `Output`, `Load` and `Store` are boundary ops: they move data in and out of
/// the kernel and never contribute to its [`FuseType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Kernel input placeholder.
    Data,
    /// Kernel output placeholder.
    Output,
    Load,
    Store,
    Broadcast,
    Transpose,
    Slice,
    Concat,
    Gather,
    /// Matmul and other cube-unit ops.
    Cube,
    Reduce,
    Pointwise,
    Split,
}

impl OpKind {
    pub fn is_boundary(self) -> bool {
        matches!(
            self,
            OpKind::Data | OpKind::Output | OpKind::Load | OpKind::Store
        )
    }

    pub fn fuse_type(self) -> FuseType {
        match self {
            OpKind::Data | OpKind::Output | OpKind::Load | OpKind::Store => FuseType::EMPTY,
            OpKind::Broadcast => FuseType::BROADCAST,
            OpKind::Transpose => FuseType::TRANSPOSE,
            OpKind::Slice => FuseType::SLICE,
            OpKind::Concat => FuseType::CONCAT,
            OpKind::Gather => FuseType::GATHER,
            OpKind::Cube => FuseType::CUBE,
            OpKind::Reduce => FuseType::REDUCTION,
            OpKind::Pointwise => FuseType::POINTWISE,
            OpKind::Split => FuseType::SPLIT,
        }
    }
}

/// Set of categories exercised by the members of a subgraph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FuseType(u32);

impl FuseType {
    pub const EMPTY: FuseType = FuseType(0);
    pub const POINTWISE: FuseType = FuseType(1 << 0);
    pub const BROADCAST: FuseType = FuseType(1 << 1);
    pub const TRANSPOSE: FuseType = FuseType(1 << 2);
    pub const REDUCTION: FuseType = FuseType(1 << 3);
    pub const CONCAT: FuseType = FuseType(1 << 4);
    pub const GATHER: FuseType = FuseType(1 << 5);
    pub const CUBE: FuseType = FuseType(1 << 6);
    pub const SPLIT: FuseType = FuseType(1 << 7);
    pub const SLICE: FuseType = FuseType(1 << 8);

    const NAMES: [(FuseType, &'static str); 9] = [
        (FuseType::POINTWISE, "Pointwise"),
        (FuseType::BROADCAST, "Broadcast"),
        (FuseType::TRANSPOSE, "Transpose"),
        (FuseType::REDUCTION, "Reduction"),
        (FuseType::CONCAT, "Concat"),
        (FuseType::GATHER, "Gather"),
        (FuseType::CUBE, "Cube"),
        (FuseType::SPLIT, "Split"),
        (FuseType::SLICE, "Slice"),
    ];

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set in `self`.
    pub fn contains(self, other: FuseType) -> bool {
        !other.is_empty() && self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: FuseType) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_subset_of(self, other: FuseType) -> bool {
        self.0 & !other.0 == 0
    }

    /// True if the subgraph only does elementwise work (or nothing beyond moving data).
    pub fn is_pointwise_only(self) -> bool {
        self.is_subset_of(FuseType::POINTWISE)
    }

    /// Single-bit components, lowest bit first.
    pub fn iter(self) -> impl Iterator<Item = FuseType> {
        (0..u32::BITS)
            .map(|b| FuseType(1 << b))
            .filter(move |bit| self.intersects(*bit))
    }
}

impl BitOr for FuseType {
    type Output = FuseType;

    fn bitor(self, rhs: FuseType) -> FuseType {
        FuseType(self.0 | rhs.0)
    }
}

impl BitOrAssign for FuseType {
    fn bitor_assign(&mut self, rhs: FuseType) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for FuseType {
    type Output = FuseType;

    fn bitand(self, rhs: FuseType) -> FuseType {
        FuseType(self.0 & rhs.0)
    }
}

impl std::fmt::Debug for FuseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = FuseType::NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "FuseType(Empty)")
        } else {
            write!(f, "FuseType({})", names.join(" | "))
        }
    }
}
