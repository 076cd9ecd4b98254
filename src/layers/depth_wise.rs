//! Depthwise-separable blocks used by MobileFaceNet.
use super::{conv_block, linear_block, ConvBlock};
use tch::{nn, nn::ModuleT, Tensor};

/// Pointwise expansion to `hidden` channels, a depthwise convolution, then a
/// linear pointwise projection to `c_out` channels.
#[derive(Debug)]
pub struct DepthWise {
    conv: ConvBlock,
    conv_dw: ConvBlock,
    project: ConvBlock,
    residual: bool,
}

impl DepthWise {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        p: nn::Path,
        c_in: i64,
        c_out: i64,
        hidden: i64,
        ksize: i64,
        stride: i64,
        padding: i64,
        residual: bool,
    ) -> DepthWise {
        let conv = conv_block(&p / "conv", c_in, hidden, 1, 1, 0, 1);
        let conv_dw = conv_block(&p / "conv_dw", hidden, hidden, ksize, stride, padding, hidden);
        let project = linear_block(&p / "project", hidden, c_out, 1, 1, 0, 1);
        DepthWise { conv, conv_dw, project, residual }
    }

    /// The strided transition block between two resolutions.
    pub fn downsample(p: nn::Path, c_in: i64, c_out: i64, hidden: i64) -> DepthWise {
        DepthWise::new(p, c_in, c_out, hidden, 3, 2, 1, false)
    }
}

impl ModuleT for DepthWise {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let ys = xs
            .apply_t(&self.conv, train)
            .apply_t(&self.conv_dw, train)
            .apply_t(&self.project, train);
        if self.residual {
            xs + ys
        } else {
            ys
        }
    }
}

/// A stack of `num_block` residual depthwise blocks keeping `channels`
/// channels, registered under `p.model.{i}`.
pub fn residual(
    p: nn::Path,
    channels: i64,
    num_block: i64,
    hidden: i64,
    ksize: i64,
    stride: i64,
    padding: i64,
) -> nn::SequentialT {
    let p = &p / "model";
    let mut layer = nn::seq_t();
    for block_index in 0..num_block {
        layer = layer.add(DepthWise::new(
            &p / block_index,
            channels,
            channels,
            hidden,
            ksize,
            stride,
            padding,
            true,
        ));
    }
    layer
}
