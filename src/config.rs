//! JSON configuration for building and running an encoder.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tch::{nn, Device};

use crate::embedder::FaceEncoder;
use crate::vision::backbone::{Backbone, BackboneConfig};
use crate::vision::mobilefacenet::{MobileFaceNet, MobileFaceNetV2};
use crate::{FaceError, Result};

fn default_embedding_dim() -> i64 {
    512
}

/// Which encoder to build, tagged by `"arch"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "arch", rename_all = "snake_case")]
pub enum ModelConfig {
    Backbone(BackboneConfig),
    MobileFaceNet {
        #[serde(default = "default_embedding_dim")]
        embedding_dim: i64,
    },
    MobileFaceNetV2 {
        #[serde(default = "default_embedding_dim")]
        embedding_dim: i64,
    },
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig::MobileFaceNet { embedding_dim: default_embedding_dim() }
    }
}

impl ModelConfig {
    pub fn name(&self) -> &'static str {
        match self {
            ModelConfig::Backbone(_) => "backbone",
            ModelConfig::MobileFaceNet { .. } => "mobile_face_net",
            ModelConfig::MobileFaceNetV2 { .. } => "mobile_face_net_v2",
        }
    }

    pub fn build(&self, p: &nn::Path) -> Result<Box<dyn FaceEncoder>> {
        let model: Box<dyn FaceEncoder> = match self {
            ModelConfig::Backbone(cfg) => Box::new(Backbone::new(p, cfg)?),
            ModelConfig::MobileFaceNet { embedding_dim } => Box::new(MobileFaceNet::new(p, *embedding_dim)?),
            ModelConfig::MobileFaceNetV2 { embedding_dim } => {
                Box::new(MobileFaceNetV2::new(p, *embedding_dim)?)
            }
        };
        Ok(model)
    }
}

/// Device selection: `"cpu"`, `"auto"` or `{"cuda": ordinal}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceConfig {
    #[default]
    Cpu,
    Auto,
    Cuda(usize),
}

impl DeviceConfig {
    pub fn device(self) -> Device {
        match self {
            DeviceConfig::Cpu => Device::Cpu,
            DeviceConfig::Auto => Device::cuda_if_available(),
            DeviceConfig::Cuda(ordinal) => Device::Cuda(ordinal),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedderConfig {
    pub model: ModelConfig,
    /// Pre-trained weights, `.ot` or `.safetensors`.
    #[serde(default)]
    pub weights: Option<PathBuf>,
    #[serde(default)]
    pub device: DeviceConfig,
}

impl EmbedderConfig {
    pub fn from_file<T: AsRef<Path>>(path: T) -> Result<EmbedderConfig> {
        let path = path.as_ref();
        let cfg: EmbedderConfig = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        tracing::debug!(?path, arch = cfg.model.name(), "loaded config");
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let embedding_dim = match &self.model {
            ModelConfig::Backbone(cfg) => {
                if !(0.0..1.0).contains(&cfg.drop_ratio) {
                    return Err(FaceError::Config(format!(
                        "drop_ratio must be in [0, 1), got {}",
                        cfg.drop_ratio
                    )));
                }
                cfg.embedding_dim
            }
            ModelConfig::MobileFaceNet { embedding_dim } | ModelConfig::MobileFaceNetV2 { embedding_dim } => {
                *embedding_dim
            }
        };
        if embedding_dim <= 0 {
            return Err(FaceError::Config(format!("embedding_dim must be positive, got {embedding_dim}")));
        }
        Ok(())
    }
}
