//! MobileFaceNet implementations.
//!
//! See "MobileFaceNets: Efficient CNNs for Accurate Real-Time Face
//! Verification on Mobile Devices" Chen et al. 2018
//! https://arxiv.org/abs/1804.07573
use tch::{nn, nn::ModuleT, Tensor};

use crate::layers::{conv_block, l2_norm, linear_block, residual, DepthWise};
use crate::{FaceError, Result};

const SEP_CHANNELS: i64 = 512;

fn check_embedding_dim(embedding_dim: i64) -> Result<()> {
    if embedding_dim <= 0 {
        return Err(FaceError::Config(format!("embedding_dim must be positive, got {embedding_dim}")));
    }
    Ok(())
}

// Linear (no bias) + BatchNorm1D
fn embedding_head(p: nn::Path, p_bn: nn::Path, embedding_dim: i64) -> (nn::Linear, nn::BatchNorm) {
    let cfg = nn::LinearConfig { bias: false, ..Default::default() };
    let linear = nn::linear(p, SEP_CHANNELS, embedding_dim, cfg);
    let bn = nn::batch_norm1d(p_bn, embedding_dim, Default::default());
    (linear, bn)
}

// conv_6_sep, conv_6_dw then flatten: 128 x 7 x 7 to 512.
fn separable_head(p: nn::Path, p_dw: nn::Path) -> nn::SequentialT {
    nn::seq_t()
        .add(conv_block(p, 128, SEP_CHANNELS, 1, 1, 0, 1))
        .add(linear_block(p_dw, SEP_CHANNELS, SEP_CHANNELS, 7, 1, 0, SEP_CHANNELS))
        .add_fn(|xs| xs.flat_view())
}

/// MobileFaceNet, variables are named after its layers (`conv1`, `conv_23`,
/// ..., `linear`, `bn`).
#[derive(Debug)]
pub struct MobileFaceNet {
    stem: nn::SequentialT,
    conv_4: nn::SequentialT,
    tail: nn::SequentialT,
    linear: nn::Linear,
    bn: nn::BatchNorm,
    embedding_dim: i64,
}

impl MobileFaceNet {
    pub fn new(p: &nn::Path, embedding_dim: i64) -> Result<MobileFaceNet> {
        check_embedding_dim(embedding_dim)?;
        tracing::debug!(embedding_dim, "building mobilefacenet");
        // conv1 to conv_34, ends on the 128 x 14 x 14 map that conv_4 keeps.
        let stem = nn::seq_t()
            .add(conv_block(p / "conv1", 3, 64, 3, 2, 1, 1))
            .add(conv_block(p / "conv2_dw", 64, 64, 3, 1, 1, 64))
            .add(DepthWise::downsample(p / "conv_23", 64, 64, 128))
            .add(residual(p / "conv_3", 64, 4, 128, 3, 1, 1))
            .add(DepthWise::downsample(p / "conv_34", 64, 128, 256));
        let conv_4 = residual(p / "conv_4", 128, 6, 256, 3, 1, 1);
        let tail = nn::seq_t()
            .add(DepthWise::downsample(p / "conv_45", 128, 128, 512))
            .add(residual(p / "conv_5", 128, 2, 256, 3, 1, 1))
            .add(separable_head(p / "conv_6_sep", p / "conv_6_dw"));
        let (linear, bn) = embedding_head(p / "linear", p / "bn", embedding_dim);
        Ok(MobileFaceNet { stem, conv_4, tail, linear, bn, embedding_dim })
    }

    pub fn embedding_dim(&self) -> i64 {
        self.embedding_dim
    }

    /// Returns the normalized embedding together with the raw output of the
    /// `conv_4` residual stage, a `[N, 128, 14, 14]` feature map.
    pub fn forward_vae_t(&self, xs: &Tensor, train: bool) -> (Tensor, Tensor) {
        let split = xs.apply_t(&self.stem, train).apply_t(&self.conv_4, train);
        let ys = split.apply_t(&self.tail, train).apply(&self.linear).apply_t(&self.bn, train);
        (l2_norm(&ys), split)
    }
}

impl ModuleT for MobileFaceNet {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.forward_vae_t(xs, train).0
    }
}

/// MobileFaceNet split into indexed stages whose outputs can be tapped.
#[derive(Debug)]
pub struct MobileFaceNetV2 {
    stages: Vec<nn::SequentialT>,
    embedding_dim: i64,
}

impl MobileFaceNetV2 {
    /// Number of tappable stages.
    pub const STAGE_COUNT: usize = 7;

    pub fn new(p: &nn::Path, embedding_dim: i64) -> Result<MobileFaceNetV2> {
        check_embedding_dim(embedding_dim)?;
        tracing::debug!(embedding_dim, "building mobilefacenet v2");
        let m = p / "main_module";
        let s = |i: usize| &m / i;

        // 64 x 56 x 56
        let stage0 = nn::seq_t().add(conv_block(s(0), 3, 64, 3, 2, 1, 1));
        // 64 x 28 x 28
        let stage1 = nn::seq_t()
            .add(conv_block(&s(1) / 0, 64, 64, 3, 1, 1, 64))
            .add(DepthWise::downsample(&s(1) / 1, 64, 64, 128));
        // 128 x 14 x 14
        let stage2 = nn::seq_t()
            .add(residual(&s(2) / 0, 64, 4, 128, 3, 1, 1))
            .add(DepthWise::downsample(&s(2) / 1, 64, 128, 256));
        // 128 x 7 x 7
        let stage3 = nn::seq_t()
            .add(residual(&s(3) / 0, 128, 6, 256, 3, 1, 1))
            .add(DepthWise::downsample(&s(3) / 1, 128, 128, 512));
        let stage4 = nn::seq_t().add(residual(&s(4) / 0, 128, 2, 256, 3, 1, 1));
        // 512
        let stage5 = nn::seq_t().add(separable_head(&s(5) / 0, &s(5) / 1));
        let (linear, bn) = embedding_head(&s(6) / 0, &s(6) / 1, embedding_dim);
        let stage6 = nn::seq_t().add(linear).add(bn);

        let stages = vec![stage0, stage1, stage2, stage3, stage4, stage5, stage6];
        Ok(MobileFaceNetV2 { stages, embedding_dim })
    }

    pub fn embedding_dim(&self) -> i64 {
        self.embedding_dim
    }

    /// Runs the stages up to and including `stage` and returns the raw,
    /// un-normalized output of that stage.
    pub fn features_t(&self, xs: &Tensor, stage: usize, train: bool) -> Result<Tensor> {
        if stage >= Self::STAGE_COUNT {
            return Err(FaceError::StageOutOfRange { stage: stage as i64, count: Self::STAGE_COUNT });
        }
        let mut ys = xs.shallow_clone();
        for layer in self.stages[..=stage].iter() {
            ys = ys.apply_t(layer, train);
        }
        Ok(ys)
    }
}

impl ModuleT for MobileFaceNetV2 {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let ys = self.stages.iter().fold(xs.shallow_clone(), |ys, layer| ys.apply_t(layer, train));
        l2_norm(&ys)
    }
}
