use std::fmt;

use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::prelude::*;
use num_traits::Float;

use crate::errors::{Result, SpineDiscError};
use crate::segmenter::DiscRegion;
use crate::traits::DiscClassifier;

pub const PFIRRMAN_CLASSES: usize = 5;
pub const BINARY_HEADS: usize = 6;

/// Per-channel means subtracted by the ResNet50 preprocessing, in BGR order.
pub const IMAGENET_BGR_MEAN: [f32; 3] = [103.939, 116.779, 123.68];

/// Distributions from the categorical head group.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalHeads {
    pub pfirrman: Vec<f32>,
    pub modic: Vec<f32>,
}

/// Raw classifier output for a single disc.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierOutput {
    pub categorical: CategoricalHeads,
    /// upper endplate, lower endplate, herniation, narrowing, bulging, spondylolisthesis
    pub binary: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinaryScores {
    pub upper_endplate: f32,
    pub lower_endplate: f32,
    pub herniation: f32,
    pub narrowing: f32,
    pub bulging: f32,
    pub spondylolisthesis: f32,
}

impl BinaryScores {
    fn labelled(&self) -> [(&'static str, f32); BINARY_HEADS] {
        [
            ("Up Endplate", self.upper_endplate),
            ("Low Endplate", self.lower_endplate),
            ("Disc Herniation", self.herniation),
            ("Disc Narrowing", self.narrowing),
            ("Disc Bulging", self.bulging),
            ("Spondylolisthesis", self.spondylolisthesis),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionReport {
    /// Clinical grade, 1 through 5.
    pub pfirrman_grade: u8,
    pub modic_type: usize,
    pub scores: BinaryScores,
}

impl fmt::Display for PredictionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pfirrman Grade: {}", self.pfirrman_grade)?;
        writeln!(f, "Modic: {}", self.modic_type)?;
        for (label, score) in self.scores.labelled() {
            writeln!(f, "{label}: {score:.2}")?;
        }
        Ok(())
    }
}

/// Index of the largest value. The first maximum wins; NaN never does.
pub fn argmax<T: Float>(values: &[T]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, T)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

fn head_error(reason: String) -> SpineDiscError {
    SpineDiscError::Model {
        operation: "interpret classifier heads".to_string(),
        source: reason.into(),
    }
}

/// Turns raw head outputs into a report.
pub fn fuse(output: &ClassifierOutput) -> Result<PredictionReport> {
    let CategoricalHeads { pfirrman, modic } = &output.categorical;

    if pfirrman.len() != PFIRRMAN_CLASSES {
        return Err(head_error(format!(
            "expected {PFIRRMAN_CLASSES} Pfirrman classes, got {}",
            pfirrman.len()
        )));
    }
    let mut all_values = pfirrman.iter().chain(modic).chain(&output.binary);
    if let Some(v) = all_values.find(|v| !v.is_finite()) {
        return Err(head_error(format!("non-finite head value {v}")));
    }

    let pfirrman_index = argmax(pfirrman.as_slice()).ok_or_else(|| head_error("empty Pfirrman head".into()))?;
    let modic_type = argmax(modic.as_slice()).ok_or_else(|| head_error("empty Modic head".into()))?;

    let binary: [f32; BINARY_HEADS] = output
        .binary
        .as_slice()
        .try_into()
        .map_err(|_| head_error(format!("expected {BINARY_HEADS} binary heads, got {}", output.binary.len())))?;
    let [upper_endplate, lower_endplate, herniation, narrowing, bulging, spondylolisthesis] =
        binary.map(|p| p.clamp(0.0, 1.0));

    Ok(PredictionReport {
        pfirrman_grade: (pfirrman_index + 1) as u8,
        modic_type,
        scores: BinaryScores {
            upper_endplate,
            lower_endplate,
            herniation,
            narrowing,
            bulging,
            spondylolisthesis,
        },
    })
}

/// Resizes a crop to the backbone resolution and applies the ResNet50 normalization:
/// BGR channel order, ImageNet means subtracted, no scaling, NHWC layout.
pub fn preprocess(crop: &RgbImage, input_size: u32) -> Array4<f32> {
    let resized = imageops::resize(crop, input_size, input_size, FilterType::CatmullRom);
    let side = input_size as usize;
    Array4::from_shape_fn((1, side, side, 3), |(_, y, x, c)| {
        let pixel = resized.get_pixel(x as u32, y as u32);
        f32::from(pixel[2 - c]) - IMAGENET_BGR_MEAN[c]
    })
}

/// Grades one disc. Empty crops are rejected before they reach the classifier.
pub fn predict<C: DiscClassifier + ?Sized>(classifier: &C, region: &DiscRegion) -> Result<PredictionReport> {
    let (width, height) = region.image.dimensions();
    if width == 0 || height == 0 {
        return Err(SpineDiscError::InvalidCrop {
            rank: region.rank,
            reason: format!("crop has zero area ({width}x{height})"),
        });
    }

    let tensor = preprocess(&region.image, classifier.input_size());
    let output = classifier.classify(tensor.view())?;
    fuse(&output)
}
