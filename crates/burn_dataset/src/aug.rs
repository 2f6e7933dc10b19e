//! Image augmentation and transformation pipeline.

use crate::types::{DatasetError, DatasetResult};
use image::imageops::FilterType;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which training-time augmentation set to apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AugmentationKind {
    /// Resize and normalise only.
    #[default]
    Base,
    /// Center crop, resize, color jitter and pixel noise.
    Custom,
}

impl FromStr for AugmentationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base" => Ok(Self::Base),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown augmentation '{other}' (expected base|custom)")),
        }
    }
}

impl fmt::Display for AugmentationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Base => "base",
            Self::Custom => "custom",
        })
    }
}

/// Per-channel mean/std applied after scaling pixels to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            mean: [0.548, 0.504, 0.479],
            std: [0.237, 0.247, 0.246],
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipeline {
    /// Output (height, width).
    pub resize: (u32, u32),
    pub normalization: Normalization,
    /// Optional (height, width) center crop taken before resizing.
    pub center_crop: Option<(u32, u32)>,
    pub flip_horizontal_prob: f32,
    pub color_jitter_prob: f32,
    pub color_jitter_strength: f32,
    pub noise_prob: f32,
    pub noise_strength: f32,
    /// Base seed for per-sample RNGs; `None` draws from the thread RNG.
    pub seed: Option<u64>,
}

impl TransformPipeline {
    /// Deterministic pipeline used for validation and test images.
    pub fn eval(resize: (u32, u32), normalization: Normalization) -> Self {
        Self {
            resize,
            normalization,
            center_crop: None,
            flip_horizontal_prob: 0.0,
            color_jitter_prob: 0.0,
            color_jitter_strength: 0.0,
            noise_prob: 0.0,
            noise_strength: 0.0,
            seed: None,
        }
    }

    pub fn for_training(
        kind: AugmentationKind,
        resize: (u32, u32),
        normalization: Normalization,
        seed: u64,
    ) -> Self {
        let base = Self {
            seed: Some(seed),
            ..Self::eval(resize, normalization)
        };
        match kind {
            AugmentationKind::Base => base,
            AugmentationKind::Custom => Self {
                center_crop: Some((320, 256)),
                color_jitter_prob: 1.0,
                color_jitter_strength: 0.1,
                noise_prob: 1.0,
                noise_strength: 0.02,
                ..base
            },
        }
    }

    pub fn describe(&self) -> String {
        let crop = self
            .center_crop
            .map(|(h, w)| format!("{h}x{w}"))
            .unwrap_or_else(|| "none".to_string());
        format!(
            "resize={}x{} crop={} flip_p={:.2} color_jitter_p={:.2} strength={:.2} noise_p={:.2} strength={:.3} seed={}",
            self.resize.0,
            self.resize.1,
            crop,
            self.flip_horizontal_prob,
            self.color_jitter_prob,
            self.color_jitter_strength,
            self.noise_prob,
            self.noise_strength,
            self.seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        )
    }

    /// Decode `path` and run it through the pipeline.
    pub fn load(&self, path: &Path, salt: u64) -> DatasetResult<Vec<f32>> {
        let img = image::open(path)
            .map_err(|e| DatasetError::Image {
                path: path.to_path_buf(),
                source: e,
            })?
            .to_rgb8();
        Ok(self.apply(img, salt))
    }

    /// Returns the image as normalised CHW floats of shape `[3, height, width]`.
    ///
    /// `salt` is mixed into the seed so each (sample, epoch) pair draws its own
    /// augmentation while staying reproducible.
    pub fn apply(&self, img: image::RgbImage, salt: u64) -> Vec<f32> {
        let mut rng_local;
        let mut seeded_rng;
        let rng: &mut dyn rand::RngCore = if let Some(seed) = self.seed {
            seeded_rng = rand::rngs::StdRng::seed_from_u64(seed ^ salt);
            &mut seeded_rng
        } else {
            rng_local = rand::rng();
            &mut rng_local
        };

        let img = match self.center_crop {
            Some((h, w)) => center_crop(img, h, w),
            None => img,
        };
        let (height, width) = self.resize;
        let mut img = if img.dimensions() == (width, height) {
            img
        } else {
            image::imageops::resize(&img, width, height, FilterType::Triangle)
        };
        maybe_hflip(&mut img, self.flip_horizontal_prob, rng);
        maybe_jitter(
            &mut img,
            self.color_jitter_prob,
            self.color_jitter_strength,
            rng,
        );
        maybe_noise(&mut img, self.noise_prob, self.noise_strength, rng);
        to_normalized_chw(&img, &self.normalization)
    }
}

fn center_crop(img: image::RgbImage, crop_h: u32, crop_w: u32) -> image::RgbImage {
    let (w, h) = img.dimensions();
    let cw = crop_w.min(w);
    let ch = crop_h.min(h);
    if (cw, ch) == (w, h) {
        return img;
    }
    let x0 = (w - cw) / 2;
    let y0 = (h - ch) / 2;
    image::imageops::crop_imm(&img, x0, y0, cw, ch).to_image()
}

pub fn to_normalized_chw(img: &image::RgbImage, norm: &Normalization) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut chw = vec![0.0f32; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let base = (y * width + x) as usize;
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            chw[c * plane + base] = (v - norm.mean[c]) / norm.std[c];
        }
    }
    chw
}

pub(crate) fn maybe_hflip(img: &mut image::RgbImage, prob: f32, rng: &mut dyn rand::RngCore) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) < prob {
        image::imageops::flip_horizontal_in_place(img);
    }
}

pub(crate) fn maybe_jitter(
    img: &mut image::RgbImage,
    prob: f32,
    strength: f32,
    rng: &mut dyn rand::RngCore,
) {
    if prob <= 0.0 || strength <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    let bright = 1.0 + rng.random_range(-strength..strength);
    let contrast = 1.0 + rng.random_range(-strength..strength);
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            let v = ((v - 0.5) * contrast + 0.5) * bright;
            pixel[c] = (v.clamp(0.0, 1.0) * 255.0) as u8;
        }
    }
}

pub(crate) fn maybe_noise(
    img: &mut image::RgbImage,
    prob: f32,
    strength: f32,
    rng: &mut dyn rand::RngCore,
) {
    if prob <= 0.0 || strength <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            let noise = rng.random_range(-strength..strength);
            let v = (pixel[c] as f32 / 255.0 + noise).clamp(0.0, 1.0);
            pixel[c] = (v * 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod aug_tests {
    use super::*;

    #[test]
    fn output_is_chw_of_resize_shape() {
        let img = image::RgbImage::from_pixel(10, 20, image::Rgb([255, 0, 128]));
        let pipeline = TransformPipeline::eval((8, 6), Normalization::default());
        let chw = pipeline.apply(img, 0);
        assert_eq!(chw.len(), 3 * 8 * 6);
        let norm = Normalization::default();
        let red = (1.0 - norm.mean[0]) / norm.std[0];
        assert!((chw[0] - red).abs() < 0.02);
        let green = (0.0 - norm.mean[1]) / norm.std[1];
        assert!((chw[48] - green).abs() < 0.02);
    }

    #[test]
    fn seeded_custom_pipeline_is_reproducible() {
        let img = image::RgbImage::from_fn(16, 16, |x, y| image::Rgb([(x * 8) as u8, (y * 8) as u8, 77]));
        let pipeline =
            TransformPipeline::for_training(AugmentationKind::Custom, (8, 8), Normalization::default(), 7);
        let a = pipeline.apply(img.clone(), 3);
        let b = pipeline.apply(img.clone(), 3);
        let c = pipeline.apply(img, 4);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn center_crop_clamps_to_image() {
        let img = image::RgbImage::new(100, 50);
        let cropped = center_crop(img, 320, 80);
        assert_eq!(cropped.dimensions(), (80, 50));
    }

    #[test]
    fn augmentation_names_parse() {
        assert_eq!("Custom".parse::<AugmentationKind>(), Ok(AugmentationKind::Custom));
        assert!("mixup".parse::<AugmentationKind>().is_err());
    }
}
