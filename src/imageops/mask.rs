use image::{GrayImage, Luma, Rgb};

use crate::imageops::Image;

/// Per-pixel disc probability as produced by the segmentation network.
pub type ProbabilityMask = Image<Luma<f32>>;

/// Foreground pixels are `FOREGROUND`, background pixels are 0.
pub type BinaryMask = GrayImage;

pub const FOREGROUND: u8 = 255;
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Binarizes a probability mask. A cell is foreground only when its probability is
/// strictly greater than `threshold`; the output keeps the source resolution.
pub fn threshold(mask: &ProbabilityMask, threshold: f32) -> BinaryMask {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let Luma([probability]) = *mask.get_pixel(x, y);
        if probability > threshold {
            Luma([FOREGROUND])
        } else {
            Luma([0])
        }
    })
}

/// Inclusive per-channel bounds on an 8-bit HSV image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, Rgb(hsv): Rgb<u8>) -> bool {
        hsv.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .all(|(&v, (&lo, &hi))| lo <= v && v <= hi)
    }
}

/// Selects pixels of an HSV image that fall in any of `ranges`.
pub fn in_ranges(hsv: &Image<Rgb<u8>>, ranges: &[HsvRange]) -> BinaryMask {
    GrayImage::from_fn(hsv.width(), hsv.height(), |x, y| {
        let pixel = *hsv.get_pixel(x, y);
        if ranges.iter().any(|range| range.contains(pixel)) {
            Luma([FOREGROUND])
        } else {
            Luma([0])
        }
    })
}
