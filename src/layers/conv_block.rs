//! Conv2d + BatchNorm2d with an optional PReLU.
use super::PReLU;
use tch::{nn, nn::ModuleT, Tensor};

#[derive(Debug)]
pub struct ConvBlock {
    conv: nn::Conv2D,
    bn: nn::BatchNorm,
    prelu: Option<PReLU>,
}

fn conv_bn(
    p: &nn::Path,
    c_in: i64,
    c_out: i64,
    ksize: i64,
    stride: i64,
    padding: i64,
    groups: i64,
) -> (nn::Conv2D, nn::BatchNorm) {
    let cfg = nn::ConvConfig { stride, padding, groups, bias: false, ..Default::default() };
    let conv = nn::conv2d(p / "conv", c_in, c_out, ksize, cfg);
    let bn = nn::batch_norm2d(p / "bn", c_out, Default::default());
    (conv, bn)
}

/// Conv2D + BatchNorm2D + PReLU
pub fn conv_block(
    p: nn::Path,
    c_in: i64,
    c_out: i64,
    ksize: i64,
    stride: i64,
    padding: i64,
    groups: i64,
) -> ConvBlock {
    let (conv, bn) = conv_bn(&p, c_in, c_out, ksize, stride, padding, groups);
    let prelu = Some(PReLU::new(&p / "prelu", c_out));
    ConvBlock { conv, bn, prelu }
}

/// Conv2D + BatchNorm2D, no activation.
pub fn linear_block(
    p: nn::Path,
    c_in: i64,
    c_out: i64,
    ksize: i64,
    stride: i64,
    padding: i64,
    groups: i64,
) -> ConvBlock {
    let (conv, bn) = conv_bn(&p, c_in, c_out, ksize, stride, padding, groups);
    ConvBlock { conv, bn, prelu: None }
}

impl ModuleT for ConvBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let ys = xs.apply(&self.conv).apply_t(&self.bn, train);
        match &self.prelu {
            Some(prelu) => ys.apply(prelu),
            None => ys,
        }
    }
}
