/// Element type carried by a tensor descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DType {
    #[default]
    F32,
    F16,
    BF16,
    I64,
    I32,
    U8,
    Bool,
}
