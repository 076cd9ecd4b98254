//! Parametric ReLU with one slope per channel.
use tch::{nn, Tensor};

/// Initial slope, the PyTorch default.
const INIT_SLOPE: f64 = 0.25;

#[derive(Debug)]
pub struct PReLU {
    pub ws: Tensor,
}

impl PReLU {
    pub fn new(p: nn::Path, channels: i64) -> PReLU {
        let ws = p.var("weight", &[channels], nn::Init::Const(INIT_SLOPE));
        PReLU { ws }
    }
}

impl nn::Module for PReLU {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.prelu(&self.ws)
    }
}
