//! Building blocks shared by the face embedding networks.
//!
//! Variable names follow the PyTorch module layout so that converted
//! checkpoints can be loaded into a `VarStore` as is.
use tch::Tensor;

mod conv_block;
pub use conv_block::{conv_block, linear_block, ConvBlock};

mod depth_wise;
pub use depth_wise::{residual, DepthWise};

mod prelu;
pub use prelu::PReLU;

mod squeeze_excite;
pub use squeeze_excite::SqueezeExcite;

const NORM_EPS: f64 = 1e-12;

/// Normalizes each row of `xs` to unit L2 norm along dimension 1.
///
/// Rows with a zero norm come out as zeros.
pub fn l2_norm(xs: &Tensor) -> Tensor {
    let norm = xs.norm_scalaropt_dim(2, [1i64].as_slice(), true);
    xs / norm.clamp_min(NORM_EPS)
}
