//! Transposed-convolution decoder mirroring `MobileFaceNetV2`.
//!
//! Maps an embedding, or a feature map tapped from one of the encoder
//! stages, back to a 3x112x112 image with values in [-1, 1].
use tch::{nn, nn::ModuleT, Tensor};

use crate::{FaceError, Result};

fn tr2d(p: nn::Path, c_in: i64, c_out: i64, ksize: i64, stride: i64, padding: i64) -> nn::ConvTranspose2D {
    let cfg = nn::ConvTransposeConfig { stride, padding, bias: false, ..Default::default() };
    nn::conv_transpose2d(p, c_in, c_out, ksize, cfg)
}

// ConvTranspose2D + BatchNorm2D + ReLU, the activation sits at index 2.
fn tr_bn_relu(p: &nn::Path, idx: i64, c_in: i64, c_out: i64, ksize: i64, stride: i64, padding: i64) -> nn::SequentialT {
    nn::seq_t()
        .add(tr2d(p / idx, c_in, c_out, ksize, stride, padding))
        .add(nn::batch_norm2d(p / (idx + 1), c_out, Default::default()))
        .add_fn(|xs| xs.relu())
}

// (channels, side) of the feature map each stage after the first consumes.
const STAGE_INPUTS: [(i64, i64); 4] = [(128, 7), (128, 14), (64, 28), (64, 56)];

#[derive(Debug)]
pub struct RevMobileFaceNetV2 {
    stages: Vec<nn::SequentialT>,
    embedding_dim: i64,
}

impl RevMobileFaceNetV2 {
    pub const STAGE_COUNT: usize = 5;

    pub fn new(p: &nn::Path, embedding_dim: i64) -> Result<RevMobileFaceNetV2> {
        if embedding_dim <= 0 {
            return Err(FaceError::Config(format!("embedding_dim must be positive, got {embedding_dim}")));
        }
        tracing::debug!(embedding_dim, "building reverse mobilefacenet v2");
        let m = p / "main_module";
        let s = |i: usize| &m / i;

        // 1 x 1 -> 3 x 3 -> 128 x 7 x 7
        let stage0 = nn::seq_t()
            .add(tr_bn_relu(&s(0), 0, embedding_dim, 128, 3, 1, 0))
            .add(tr_bn_relu(&s(0), 3, 128, 128, 3, 2, 0));
        // 128 x 14 x 14
        let stage1 = tr_bn_relu(&s(1), 0, 128, 128, 4, 2, 1);
        // 64 x 28 x 28
        let stage2 = tr_bn_relu(&s(2), 0, 128, 64, 4, 2, 1);
        // 64 x 56 x 56
        let stage3 = tr_bn_relu(&s(3), 0, 64, 64, 4, 2, 1);
        // 3 x 112 x 112
        let stage4 = nn::seq_t().add(tr2d(&s(4) / 0, 64, 3, 4, 2, 1)).add_fn(|xs| xs.tanh());

        let stages = vec![stage0, stage1, stage2, stage3, stage4];
        Ok(RevMobileFaceNetV2 { stages, embedding_dim })
    }

    pub fn embedding_dim(&self) -> i64 {
        self.embedding_dim
    }

    /// Index of the first decoder stage to run for an input coming out of
    /// encoder stage `out_layer`.
    ///
    /// Encoder stage 4 keeps the 128x7x7 shape of stage 3, anything past it
    /// is a flat embedding that goes through every decoder stage.
    pub fn first_stage(out_layer: i64) -> Result<usize> {
        let count = Self::STAGE_COUNT;
        match out_layer {
            0..=3 => Ok(count - 1 - out_layer as usize),
            4 => Ok(count - 4),
            l if l > 4 => Ok(0),
            l => Err(FaceError::StageOutOfRange { stage: l, count }),
        }
    }

    /// Decodes `xs`, the output of encoder stage `out_layer`.
    ///
    /// Flat `[N, D]` inputs are viewed as `[N, D, 1, 1]`.
    pub fn decode_t(&self, xs: &Tensor, out_layer: i64, train: bool) -> Result<Tensor> {
        let first = Self::first_stage(out_layer)?;
        let xs = if first == 0 {
            match xs.size().as_slice() {
                &[bsize, dim] if dim == self.embedding_dim => xs.view([bsize, dim, 1, 1]),
                &[_, dim, 1, 1] if dim == self.embedding_dim => xs.shallow_clone(),
                dims => {
                    return Err(FaceError::Shape(format!(
                        "expected [N, {}] embeddings, got {dims:?}",
                        self.embedding_dim
                    )))
                }
            }
        } else {
            let (c, side) = STAGE_INPUTS[first - 1];
            match xs.size().as_slice() {
                &[_, c_in, h, w] if c_in == c && h == side && w == side => xs.shallow_clone(),
                dims => {
                    return Err(FaceError::Shape(format!(
                        "expected [N, {c}, {side}, {side}] features for stage {out_layer}, got {dims:?}"
                    )))
                }
            }
        };
        Ok(self.run_from(&xs, first, train))
    }

    fn run_from(&self, xs: &Tensor, first: usize, train: bool) -> Tensor {
        self.stages[first..].iter().fold(xs.shallow_clone(), |ys, layer| ys.apply_t(layer, train))
    }
}

impl ModuleT for RevMobileFaceNetV2 {
    /// Decodes a 128x7x7 feature map from the encoder's stage 4.
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.run_from(xs, Self::STAGE_COUNT - 4, train)
    }
}
