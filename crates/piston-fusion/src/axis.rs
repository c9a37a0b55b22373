use crate::Expr;

/// Identifier of a loop dimension, unique within one [`Subgraph`](crate::Subgraph).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AxisId(pub usize);

impl std::fmt::Debug for AxisId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "A{}", self.0)
    }
}

impl std::fmt::Display for AxisId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "A{}", self.0)
    }
}

impl From<usize> for AxisId {
    fn from(id: usize) -> Self {
        AxisId(id)
    }
}

/// A named loop dimension with a symbolic extent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_new::new)]
pub struct Axis {
    pub id: AxisId,
    pub name: String,
    pub size: Expr,
}
