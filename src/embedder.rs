//! Inference front-end: build an encoder, load its weights and turn face
//! crops into embeddings.
use std::path::Path;

use serde::Serialize;
use tch::{nn, nn::ModuleT, Device, Kind, Tensor};

use crate::config::EmbedderConfig;
use crate::vision::backbone::Backbone;
use crate::vision::image;
use crate::vision::mobilefacenet::{MobileFaceNet, MobileFaceNetV2};
use crate::{FaceError, Result};

/// A network mapping [N, 3, S, S] face crops to L2-normalized
/// [N, embedding_dim] embeddings.
pub trait FaceEncoder: ModuleT {
    fn embedding_dim(&self) -> i64;

    fn input_size(&self) -> i64 {
        image::INPUT_SIZE
    }
}

impl FaceEncoder for Backbone {
    fn embedding_dim(&self) -> i64 {
        Backbone::embedding_dim(self)
    }
}

impl FaceEncoder for MobileFaceNet {
    fn embedding_dim(&self) -> i64 {
        MobileFaceNet::embedding_dim(self)
    }
}

impl FaceEncoder for MobileFaceNetV2 {
    fn embedding_dim(&self) -> i64 {
        MobileFaceNetV2::embedding_dim(self)
    }
}

pub struct Embedder {
    vs: nn::VarStore,
    model: Box<dyn FaceEncoder>,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("device", &self.vs.device())
            .field("variables", &self.vs.len())
            .field("embedding_dim", &self.model.embedding_dim())
            .finish()
    }
}

impl Embedder {
    pub fn new(cfg: &EmbedderConfig) -> Result<Embedder> {
        cfg.validate()?;
        let mut vs = nn::VarStore::new(cfg.device.device());
        let model = cfg.model.build(&vs.root())?;
        match &cfg.weights {
            Some(weights) => {
                vs.load(weights)?;
                tracing::info!(arch = cfg.model.name(), ?weights, variables = vs.len(), "loaded weights");
            }
            None => tracing::warn!(arch = cfg.model.name(), "no weights given, using random init"),
        }
        vs.freeze();
        Ok(Embedder { vs, model })
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn embedding_dim(&self) -> i64 {
        self.model.embedding_dim()
    }

    /// Variable names and shapes, sorted by name.
    pub fn variables(&self) -> Vec<(String, Vec<i64>)> {
        let mut variables: Vec<_> =
            self.vs.variables().into_iter().map(|(name, var)| (name, var.size())).collect();
        variables.sort();
        variables
    }

    /// Embeds a single [3, S, S] image or a [N, 3, S, S] batch, returns a
    /// [N, embedding_dim] tensor on the cpu.
    ///
    /// Images must already be normalized floats, see `image::preprocess`.
    pub fn embed(&self, images: &Tensor) -> Result<Tensor> {
        if !images.is_floating_point() {
            return Err(FaceError::Kind(format!(
                "expected normalized float images, got {:?}",
                images.kind()
            )));
        }
        let size = self.model.input_size();
        let xs = match images.size().as_slice() {
            &[3, h, w] if h == size && w == size => images.unsqueeze(0),
            &[n, 3, h, w] if n > 0 && h == size && w == size => images.shallow_clone(),
            dims => {
                return Err(FaceError::Shape(format!(
                    "expected [3, {size}, {size}] or [N, 3, {size}, {size}] images, got {dims:?}"
                )))
            }
        };
        let xs = xs.to_kind(Kind::Float).to_device(self.vs.device());
        let ys = tch::no_grad(|| self.model.forward_t(&xs, false));
        Ok(ys.to_device(Device::Cpu))
    }

    /// Loads, normalizes and embeds image files as a single batch.
    pub fn embed_files<T: AsRef<Path>>(&self, paths: &[T]) -> Result<Tensor> {
        let batch = image::load_batch(paths)?;
        self.embed(&batch)
    }
}

/// One output line of `facenet embed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingRecord {
    pub image: String,
    pub embedding: Vec<f32>,
}

impl EmbeddingRecord {
    /// Non UTF-8 paths are rendered lossily.
    pub fn new(image: &Path, embedding: &Tensor) -> Result<EmbeddingRecord> {
        let embedding = Vec::<f32>::try_from(&embedding.flatten(0, -1))?;
        Ok(EmbeddingRecord { image: image.display().to_string(), embedding })
    }
}

fn check_embeddings(xs: &Tensor) -> Result<i64> {
    match xs.size().as_slice() {
        &[_, dim] => Ok(dim),
        dims => Err(FaceError::Shape(format!("expected [N, D] embeddings, got {dims:?}"))),
    }
}

/// Pairwise cosine similarities between two batches of normalized
/// embeddings, a [N, M] tensor.
pub fn similarity(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let (da, db) = (check_embeddings(a)?, check_embeddings(b)?);
    if da != db {
        return Err(FaceError::Shape(format!("embedding sizes differ: {da} vs {db}")));
    }
    Ok(a.matmul(&b.tr()))
}

/// Cosine similarity of each row of `a` with the matching row of `b`.
pub fn pair_similarity(a: &Tensor, b: &Tensor) -> Result<Vec<f32>> {
    check_embeddings(a)?;
    if a.size() != b.size() {
        return Err(FaceError::Shape(format!("mismatched batches {:?} and {:?}", a.size(), b.size())));
    }
    let sims = (a * b).sum_dim_intlist(Some([1i64].as_slice()), false, Kind::Float);
    Ok(Vec::<f32>::try_from(&sims)?)
}

/// Whether each pair of rows belongs to the same identity.
pub fn verify(a: &Tensor, b: &Tensor, threshold: f32) -> Result<Vec<bool>> {
    Ok(pair_similarity(a, b)?.into_iter().map(|s| s >= threshold).collect())
}
