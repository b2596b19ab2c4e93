use std::sync::atomic::{AtomicUsize, Ordering};

use image::{Luma, RgbImage};
use ndarray::prelude::*;

use crate::errors::{Result, SpineDiscError};
use crate::imageops::mask::ProbabilityMask;
use crate::predictor::{CategoricalHeads, ClassifierOutput};
use crate::traits::{DiscClassifier, SegmentationModel};

/// Segmentation mock that paints fixed rectangles `(x, y, width, height)` of
/// probability 0.9 onto an otherwise empty mask.
#[derive(Debug, Clone)]
pub struct MockSegmentationModel {
    pub image_size: u32,
    pub regions: Vec<(u32, u32, u32, u32)>,
}

impl MockSegmentationModel {
    pub const fn new(image_size: u32) -> Self {
        Self {
            image_size,
            regions: Vec::new(),
        }
    }

    pub fn with_region(mut self, x: u32, y: u32, width: u32, height: u32) -> Self {
        self.regions.push((x, y, width, height));
        self
    }
}

impl SegmentationModel for MockSegmentationModel {
    fn input_size(&self) -> u32 {
        self.image_size
    }

    fn segment(&self, _image: &RgbImage) -> Result<ProbabilityMask> {
        let mut mask = ProbabilityMask::from_pixel(self.image_size, self.image_size, Luma([0.05]));
        for &(x, y, w, h) in &self.regions {
            for yy in y..(y + h).min(self.image_size) {
                for xx in x..(x + w).min(self.image_size) {
                    mask.put_pixel(xx, yy, Luma([0.9]));
                }
            }
        }
        Ok(mask)
    }
}

/// Segmentation mock whose inference always fails.
#[derive(Debug, Clone, Default)]
pub struct FailingSegmentationModel;

impl SegmentationModel for FailingSegmentationModel {
    fn input_size(&self) -> u32 {
        256
    }

    fn segment(&self, _image: &RgbImage) -> Result<ProbabilityMask> {
        Err(SpineDiscError::Model {
            operation: "mock segmentation".to_string(),
            source: "inference failed".into(),
        })
    }
}

/// Classifier mock returning the same output for every disc and counting calls.
#[derive(Debug)]
pub struct MockDiscClassifier {
    pub output: ClassifierOutput,
    calls: AtomicUsize,
}

impl MockDiscClassifier {
    pub fn new(output: ClassifierOutput) -> Self {
        Self {
            output,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockDiscClassifier {
    fn default() -> Self {
        Self::new(ClassifierOutput {
            categorical: CategoricalHeads {
                pfirrman: vec![0.05, 0.1, 0.6, 0.2, 0.05],
                modic: vec![0.7, 0.2, 0.1],
            },
            binary: vec![0.11, 0.22, 0.83, 0.44, 0.55, 0.06],
        })
    }
}

impl DiscClassifier for MockDiscClassifier {
    fn input_size(&self) -> u32 {
        224
    }

    fn classify(&self, tensor: ArrayView4<f32>) -> Result<ClassifierOutput> {
        let side = self.input_size() as usize;
        if tensor.dim() != (1, side, side, 3) {
            return Err(SpineDiscError::Validation {
                field: "tensor".to_string(),
                reason: format!("unexpected shape {:?}", tensor.shape()),
            });
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}
