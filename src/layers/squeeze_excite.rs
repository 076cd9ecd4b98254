//! Squeeze-and-excitation channel gating.
//!
//! See "Squeeze-and-Excitation Networks" Hu et al. 2017
//! https://arxiv.org/abs/1709.01507
use tch::{nn, Tensor};

#[derive(Debug)]
pub struct SqueezeExcite {
    fc1: nn::Conv2D,
    fc2: nn::Conv2D,
}

impl SqueezeExcite {
    pub fn new(p: nn::Path, channels: i64, reduction: i64) -> SqueezeExcite {
        let cfg = nn::ConvConfig { bias: false, ..Default::default() };
        let fc1 = nn::conv2d(&p / "fc1", channels, channels / reduction, 1, cfg);
        let fc2 = nn::conv2d(&p / "fc2", channels / reduction, channels, 1, cfg);
        SqueezeExcite { fc1, fc2 }
    }
}

impl nn::Module for SqueezeExcite {
    fn forward(&self, xs: &Tensor) -> Tensor {
        let scale = xs
            .adaptive_avg_pool2d(&[1, 1])
            .apply(&self.fc1)
            .relu()
            .apply(&self.fc2)
            .sigmoid();
        xs * scale
    }
}
