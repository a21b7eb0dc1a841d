mod conv;
mod linear;
mod norm;
mod product;
mod reshape;

pub use conv::TensorProductConvLayer;
pub use linear::EquivariantLinear;
pub use norm::EquivariantBatchNorm;
pub use product::EquivariantProductBasisBlock;
pub use reshape::{merge_blocks, split_blocks, IrrepsReshape};
