//! Face recognition embedding networks built on top of `tch`.
//!
//! The crate provides the ArcFace IR/IR-SE ResNet backbones, MobileFaceNet
//! and its staged variant, plus a transposed-convolution decoder mirroring
//! the latter. Variable names match the PyTorch modules so that converted
//! checkpoints load directly into a `tch::nn::VarStore`.
pub mod config;
pub mod embedder;
pub mod layers;
pub mod vision;

mod error;
pub use error::{FaceError, Result};

pub use config::{DeviceConfig, EmbedderConfig, ModelConfig};
pub use embedder::{Embedder, FaceEncoder};
