// Command line front-end for the face embedding networks.
//
//   facenet embed --config mobilefacenet.json --weights mobilefacenet.ot faces/
//   facenet compare --config ir50.json a.jpg b.jpg
//   facenet inspect --config ir50.json
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use facenet::embedder::{pair_similarity, verify, EmbeddingRecord, Embedder};
use facenet::vision::image;
use facenet::{DeviceConfig, EmbedderConfig, ModelConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Face embedding extraction")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct ModelArgs {
    /// JSON config, see `EmbedderConfig`. Defaults to MobileFaceNet on the cpu.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Weight file, overrides the one from the config.
    #[arg(long)]
    weights: Option<PathBuf>,
}

impl ModelArgs {
    fn config(&self) -> Result<EmbedderConfig> {
        let mut cfg = match &self.config {
            Some(path) => EmbedderConfig::from_file(path)?,
            None => EmbedderConfig::default(),
        };
        if self.weights.is_some() {
            cfg.weights = self.weights.clone();
        }
        Ok(cfg)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints one JSON line per image with its embedding.
    Embed {
        #[command(flatten)]
        model: ModelArgs,

        /// Image files or directories.
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Compares two face images.
    Compare {
        #[command(flatten)]
        model: ModelArgs,

        #[arg(long, default_value_t = 0.3)]
        threshold: f32,

        a: PathBuf,
        b: PathBuf,
    },
    /// Lists the variables of a model and their shapes, loading the weights
    /// when given so that missing keys are reported.
    Inspect {
        #[command(flatten)]
        model: ModelArgs,
    },
}

fn embed(model: &ModelArgs, inputs: &[PathBuf]) -> Result<()> {
    let embedder = Embedder::new(&model.config()?)?;
    let mut files = vec![];
    for input in inputs {
        files.extend(image::image_files(input)?);
    }
    tracing::info!(images = files.len(), "embedding");
    for file in files.iter() {
        let embedding = embedder.embed_files(&[file])?;
        let record = EmbeddingRecord::new(file, &embedding)?;
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

fn compare(model: &ModelArgs, threshold: f32, a: &Path, b: &Path) -> Result<()> {
    let embedder = Embedder::new(&model.config()?)?;
    let ea = embedder.embed_files(&[a])?;
    let eb = embedder.embed_files(&[b])?;
    let similarity = match pair_similarity(&ea, &eb)?.as_slice() {
        &[s] => s,
        sims => bail!("expected a single similarity, got {}", sims.len()),
    };
    let verdict = match verify(&ea, &eb, threshold)?.as_slice() {
        &[true] => "same",
        _ => "different",
    };
    println!("similarity {similarity:.4} ({verdict}, threshold {threshold})");
    Ok(())
}

fn inspect(model: &ModelArgs) -> Result<()> {
    // Loading the weights, when given, checks that every key is present.
    let cfg = EmbedderConfig { device: DeviceConfig::Cpu, ..model.config()? };
    let embedder = Embedder::new(&cfg)?;
    let variables = embedder.variables();
    let mut params = 0;
    for (name, size) in variables.iter() {
        params += size.iter().product::<i64>();
        println!("{name:60} {size:?}");
    }
    let arch = match &cfg.model {
        ModelConfig::Backbone(b) => format!("{}{}", b.mode, i64::from(b.depth)),
        m => m.name().to_string(),
    };
    println!("{arch}: {} variables, {params} parameters", variables.len());
    Ok(())
}

pub fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    match &args.command {
        Command::Embed { model, images } => embed(model, images),
        Command::Compare { model, threshold, a, b } => compare(model, *threshold, a, b),
        Command::Inspect { model } => inspect(model),
    }
}
