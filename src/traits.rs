use image::RgbImage;
use ndarray::prelude::*;

use crate::errors::Result;
use crate::imageops::mask::ProbabilityMask;
use crate::predictor::ClassifierOutput;

/// Disc segmentation network.
///
/// Implementations own their preprocessing and return a mask at their fixed input
/// resolution, not at the resolution of `image`.
pub trait SegmentationModel: Send + Sync {
    /// Side length of the square mask produced by `segment`.
    fn input_size(&self) -> u32;

    fn segment(&self, image: &RgbImage) -> Result<ProbabilityMask>;
}

/// Multi-head disc classifier operating on an already normalized NHWC tensor.
pub trait DiscClassifier: Send + Sync {
    /// Side length of the square crop the backbone expects.
    fn input_size(&self) -> u32;

    fn classify(&self, tensor: ArrayView4<f32>) -> Result<ClassifierOutput>;
}

impl<T: SegmentationModel + ?Sized> SegmentationModel for Box<T> {
    fn input_size(&self) -> u32 {
        (**self).input_size()
    }

    fn segment(&self, image: &RgbImage) -> Result<ProbabilityMask> {
        (**self).segment(image)
    }
}

impl<T: DiscClassifier + ?Sized> DiscClassifier for Box<T> {
    fn input_size(&self) -> u32 {
        (**self).input_size()
    }

    fn classify(&self, tensor: ArrayView4<f32>) -> Result<ClassifierOutput> {
        (**self).classify(tensor)
    }
}
