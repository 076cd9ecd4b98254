//! Face image loading and normalization.
//!
//! Encoders expect aligned faces resized to 112x112 with pixel values mapped
//! from [0, 255] to [-1, 1]. The decoder produces images in that same range.
use std::path::{Path, PathBuf};

use tch::{vision, Kind, Tensor};

use crate::{FaceError, Result};

/// Side of the square face crops the networks consume.
pub const INPUT_SIZE: i64 = 112;

const MEAN: f64 = 0.5;
const STD: f64 = 0.5;

/// Normalizes a uint8 image of shape [3, H, W] into a float tensor of shape
/// [3, 112, 112].
pub fn preprocess(img: &Tensor) -> Result<Tensor> {
    match img.size().as_slice() {
        &[3, h, w] if h == INPUT_SIZE && w == INPUT_SIZE => Ok(normalize(img)),
        &[3, _, _] => Ok(normalize(&vision::image::resize(img, INPUT_SIZE, INPUT_SIZE)?)),
        dims => Err(FaceError::Shape(format!("expected a [3, H, W] image, got {dims:?}"))),
    }
}

fn normalize(img: &Tensor) -> Tensor {
    (img.to_kind(Kind::Float) / 255.0 - MEAN) / STD
}

/// Loads an image file, resizes and normalizes it.
pub fn load<T: AsRef<Path>>(path: T) -> Result<Tensor> {
    let img = vision::image::load_and_resize(path, INPUT_SIZE, INPUT_SIZE)?;
    Ok(normalize(&img))
}

/// Maps images in [-1, 1] back to uint8 pixel values.
pub fn postprocess(xs: &Tensor) -> Tensor {
    ((xs * STD + MEAN) * 255.0).clamp(0., 255.).round().to_kind(Kind::Uint8)
}

/// Saves a single decoded image of shape [3, H, W] or [1, 3, H, W].
///
/// The format is based on the filename suffix, see `tch::vision::image::save`.
pub fn save<T: AsRef<Path>>(xs: &Tensor, path: T) -> Result<()> {
    let img = match xs.size().as_slice() {
        &[3, _, _] => postprocess(xs),
        &[1, 3, _, _] => postprocess(&xs.squeeze_dim(0)),
        dims => return Err(FaceError::Shape(format!("expected a single image, got {dims:?}"))),
    };
    vision::image::save(&img, path)?;
    Ok(())
}

fn visit_dirs(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                visit_dirs(&path, files)?;
            } else if path
                .extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| matches!(e.to_lowercase().as_str(), "png" | "jpg" | "jpeg"))
            {
                files.push(path);
            }
        }
    }
    Ok(())
}

/// Lists the png and jpg files below `path`, sorted. A path to a single file
/// is returned as is.
pub fn image_files<T: AsRef<Path>>(path: T) -> Result<Vec<PathBuf>> {
    let path = path.as_ref();
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = vec![];
    visit_dirs(path, &mut files)?;
    if files.is_empty() {
        return Err(FaceError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no image found in {path:?}"),
        )));
    }
    files.sort();
    Ok(files)
}

/// Loads several images as one [N, 3, 112, 112] batch.
pub fn load_batch<T: AsRef<Path>>(paths: &[T]) -> Result<Tensor> {
    let imgs = paths.iter().map(load).collect::<Result<Vec<_>>>()?;
    if imgs.is_empty() {
        return Err(FaceError::Shape("no image to stack".to_string()));
    }
    Ok(Tensor::stack(&imgs, 0))
}
