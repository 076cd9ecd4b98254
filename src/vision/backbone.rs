//! ArcFace IR-ResNet backbones.
//!
//! See "ArcFace: Additive Angular Margin Loss for Deep Face Recognition"
//! Deng et al. 2018, https://arxiv.org/abs/1801.07698
//!
//! Inputs are 112x112 aligned faces, the four stages bring the resolution
//! down to 7x7 before the embedding head.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tch::{nn, nn::ModuleT, Tensor};

use crate::layers::{l2_norm, PReLU, SqueezeExcite};
use crate::{FaceError, Result};

const SE_REDUCTION: i64 = 16;
const BODY_CHANNELS: i64 = 512;
const BODY_SPATIAL: i64 = 7;

/// Number of layers of the backbone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Depth {
    D50,
    D100,
    D152,
}

impl TryFrom<i64> for Depth {
    type Error = FaceError;

    fn try_from(num_layers: i64) -> Result<Self> {
        match num_layers {
            50 => Ok(Depth::D50),
            100 => Ok(Depth::D100),
            152 => Ok(Depth::D152),
            n => Err(FaceError::UnsupportedDepth(n)),
        }
    }
}

impl From<Depth> for i64 {
    fn from(depth: Depth) -> i64 {
        match depth {
            Depth::D50 => 50,
            Depth::D100 => 100,
            Depth::D152 => 152,
        }
    }
}

/// Bottleneck flavour: plain improved-residual units or units with an extra
/// squeeze-excitation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Ir,
    IrSe,
}

impl FromStr for Mode {
    type Err = FaceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ir" => Ok(Mode::Ir),
            "ir_se" => Ok(Mode::IrSe),
            _ => Err(FaceError::UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Mode::Ir => write!(f, "ir"),
            Mode::IrSe => write!(f, "ir_se"),
        }
    }
}

fn default_embedding_dim() -> i64 {
    512
}

fn default_depth() -> Depth {
    Depth::D50
}

fn default_drop_ratio() -> f64 {
    0.6
}

fn default_mode() -> Mode {
    Mode::Ir
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackboneConfig {
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: i64,
    #[serde(default = "default_depth", rename = "num_layers")]
    pub depth: Depth,
    #[serde(default = "default_drop_ratio")]
    pub drop_ratio: f64,
    #[serde(default = "default_mode")]
    pub mode: Mode,
}

impl Default for BackboneConfig {
    fn default() -> Self {
        BackboneConfig {
            embedding_dim: default_embedding_dim(),
            depth: default_depth(),
            drop_ratio: default_drop_ratio(),
            mode: default_mode(),
        }
    }
}

/// One residual unit of the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bottleneck {
    pub in_channel: i64,
    pub depth: i64,
    pub stride: i64,
}

/// A stage: the first unit changes the channel count and applies the
/// stride, the following ones keep the shape.
pub fn stage(in_channel: i64, depth: i64, num_units: i64, stride: i64) -> Vec<Bottleneck> {
    let mut units = vec![Bottleneck { in_channel, depth, stride }];
    for _ in 1..num_units {
        units.push(Bottleneck { in_channel: depth, depth, stride: 1 });
    }
    units
}

/// The four stages of a backbone, flattened in order.
pub fn blocks(depth: Depth) -> Vec<Bottleneck> {
    let (c1, c2, c3, c4) = match depth {
        Depth::D50 => (3, 4, 14, 3),
        Depth::D100 => (3, 13, 30, 3),
        Depth::D152 => (3, 8, 36, 3),
    };
    [(64, 64, c1), (64, 128, c2), (128, 256, c3), (256, 512, c4)]
        .iter()
        .flat_map(|&(c_in, c_out, n)| stage(c_in, c_out, n, 2))
        .collect()
}

fn conv2d(p: nn::Path, c_in: i64, c_out: i64, ksize: i64, padding: i64, stride: i64) -> nn::Conv2D {
    let conv2d_cfg = nn::ConvConfig { stride, padding, bias: false, ..Default::default() };
    nn::conv2d(&p, c_in, c_out, ksize, conv2d_cfg)
}

fn shortcut(p: nn::Path, unit: Bottleneck) -> nn::SequentialT {
    let Bottleneck { in_channel, depth, stride } = unit;
    if in_channel == depth {
        nn::seq_t().add_fn(move |xs| xs.max_pool2d(&[1, 1], &[stride, stride], &[0, 0], &[1, 1], false))
    } else {
        nn::seq_t()
            .add(conv2d(&p / 0, in_channel, depth, 1, 0, stride))
            .add(nn::batch_norm2d(&p / 1, depth, Default::default()))
    }
}

fn bottleneck(p: nn::Path, unit: Bottleneck, mode: Mode) -> impl ModuleT {
    let Bottleneck { in_channel, depth, stride } = unit;
    let shortcut = shortcut(&p / "shortcut_layer", unit);
    let r = &p / "res_layer";
    let mut res = nn::seq_t()
        .add(nn::batch_norm2d(&r / 0, in_channel, Default::default()))
        .add(conv2d(&r / 1, in_channel, depth, 3, 1, 1))
        .add(PReLU::new(&r / 2, depth))
        .add(conv2d(&r / 3, depth, depth, 3, 1, stride))
        .add(nn::batch_norm2d(&r / 4, depth, Default::default()));
    if mode == Mode::IrSe {
        res = res.add(SqueezeExcite::new(&r / 5, depth, SE_REDUCTION));
    }
    nn::func_t(move |xs, train| xs.apply_t(&res, train) + xs.apply_t(&shortcut, train))
}

/// An IR (or IR-SE) ResNet producing L2-normalized embeddings.
#[derive(Debug)]
pub struct Backbone {
    input_layer: nn::SequentialT,
    body: nn::SequentialT,
    output_layer: nn::SequentialT,
    embedding_dim: i64,
}

impl Backbone {
    pub fn new(p: &nn::Path, cfg: &BackboneConfig) -> Result<Backbone> {
        if cfg.embedding_dim <= 0 {
            return Err(FaceError::Config(format!(
                "embedding_dim must be positive, got {}",
                cfg.embedding_dim
            )));
        }
        if !(0.0..1.0).contains(&cfg.drop_ratio) {
            return Err(FaceError::Config(format!(
                "drop_ratio must be in [0, 1), got {}",
                cfg.drop_ratio
            )));
        }
        let units = blocks(cfg.depth);
        tracing::debug!(
            num_layers = i64::from(cfg.depth),
            mode = %cfg.mode,
            units = units.len(),
            "building backbone"
        );

        let i = p / "input_layer";
        let input_layer = nn::seq_t()
            .add(conv2d(&i / 0, 3, 64, 3, 1, 1))
            .add(nn::batch_norm2d(&i / 1, 64, Default::default()))
            .add(PReLU::new(&i / 2, 64));

        let b = p / "body";
        let mut body = nn::seq_t();
        for (unit_index, &unit) in units.iter().enumerate() {
            body = body.add(bottleneck(&b / unit_index, unit, cfg.mode));
        }

        let o = p / "output_layer";
        let drop_ratio = cfg.drop_ratio;
        let output_layer = nn::seq_t()
            .add(nn::batch_norm2d(&o / 0, BODY_CHANNELS, Default::default()))
            .add_fn_t(move |xs, train| xs.dropout(drop_ratio, train))
            .add_fn(|xs| xs.flat_view())
            .add(nn::linear(
                &o / 3,
                BODY_CHANNELS * BODY_SPATIAL * BODY_SPATIAL,
                cfg.embedding_dim,
                Default::default(),
            ))
            .add(nn::batch_norm1d(&o / 4, cfg.embedding_dim, Default::default()));

        Ok(Backbone { input_layer, body, output_layer, embedding_dim: cfg.embedding_dim })
    }

    pub fn embedding_dim(&self) -> i64 {
        self.embedding_dim
    }
}

impl ModuleT for Backbone {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let ys = xs
            .apply_t(&self.input_layer, train)
            .apply_t(&self.body, train)
            .apply_t(&self.output_layer, train);
        l2_norm(&ys)
    }
}

/// Creates an IR-50 backbone with 512-dimensional embeddings.
pub fn ir_50(p: &nn::Path) -> Result<Backbone> {
    Backbone::new(p, &BackboneConfig::default())
}

/// Creates an IR-SE-50 backbone with 512-dimensional embeddings.
pub fn ir_se_50(p: &nn::Path) -> Result<Backbone> {
    Backbone::new(p, &BackboneConfig { mode: Mode::IrSe, ..Default::default() })
}

pub fn ir_100(p: &nn::Path) -> Result<Backbone> {
    Backbone::new(p, &BackboneConfig { depth: Depth::D100, ..Default::default() })
}

pub fn ir_152(p: &nn::Path) -> Result<Backbone> {
    Backbone::new(p, &BackboneConfig { depth: Depth::D152, ..Default::default() })
}
