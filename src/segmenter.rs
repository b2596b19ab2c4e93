use std::fs;
use std::path::{Path, PathBuf};

use image::{imageops, ImageFormat, RgbImage};
use tracing::debug;

use crate::errors::{Result, SpineDiscError};
use crate::imageops::contours::{external_bounding_rects, PixelRect};
use crate::imageops::convert_color::ConvertHsv;
use crate::imageops::mask::{in_ranges, HsvRange};

/// Hue bands matching the overlay outline color. Red wraps around hue 0, hence two bands.
pub const RESERVED_RED_BANDS: [HsvRange; 2] = [
    HsvRange::new([0, 120, 70], [10, 255, 255]),
    HsvRange::new([170, 120, 70], [180, 255, 255]),
];

/// One cropped disc. `rank` starts at 1 for the top-most disc.
#[derive(Debug, Clone)]
pub struct DiscRegion {
    pub rank: usize,
    pub rect: PixelRect,
    pub image: RgbImage,
    pub path: Option<PathBuf>,
}

/// Finds the outlined rectangles in an overlay, sorted by their top edge. Ties keep
/// the tracer's discovery order.
pub fn locate_outlines(overlay: &RgbImage) -> Vec<PixelRect> {
    let outline_mask = in_ranges(&overlay.to_hsv(), &RESERVED_RED_BANDS);
    let mut rects = external_bounding_rects(&outline_mask);
    rects.sort_by_key(|rect| rect.y);
    rects
}

/// Crops `original` at every outline found in `overlay`, top to bottom.
///
/// An overlay without outlines yields an empty list; deciding whether that is an error
/// is left to the caller, which knows how many boxes were drawn.
pub fn extract_disc_regions(overlay: &RgbImage, original: &RgbImage) -> Result<Vec<DiscRegion>> {
    if overlay.dimensions() != original.dimensions() {
        return Err(SpineDiscError::OverlayNotFound {
            reason: format!(
                "overlay is {}x{} but the original image is {}x{}",
                overlay.width(),
                overlay.height(),
                original.width(),
                original.height()
            ),
        });
    }

    let rects = locate_outlines(overlay);
    debug!(count = rects.len(), "located disc outlines");

    Ok(rects
        .into_iter()
        .enumerate()
        .map(|(i, rect)| DiscRegion {
            rank: i + 1,
            rect,
            image: imageops::crop_imm(original, rect.x, rect.y, rect.width, rect.height).to_image(),
            path: None,
        })
        .collect())
}

/// Directory receiving the reviewable disc crops of one request.
#[derive(Debug, Clone)]
pub struct CropStore {
    dir: PathBuf,
}

impl CropStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Removes anything left from an earlier run and recreates the directory.
    pub fn reset(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir).map_err(|e| SpineDiscError::FileSystem {
                path: self.dir.clone(),
                operation: "clear crop directory".to_string(),
                source: e,
            })?;
        }
        fs::create_dir_all(&self.dir).map_err(|e| SpineDiscError::FileSystem {
            path: self.dir.clone(),
            operation: "create crop directory".to_string(),
            source: e,
        })
    }

    pub fn file_name(rank: usize) -> String {
        format!("disc_{rank}.png")
    }

    /// Writes each crop as `disc_<rank>.png` and records its path on the region.
    pub fn persist(&self, regions: &mut [DiscRegion]) -> Result<()> {
        for region in regions.iter_mut() {
            let path = self.dir.join(Self::file_name(region.rank));
            region
                .image
                .save_with_format(&path, ImageFormat::Png)
                .map_err(|e| SpineDiscError::ImageProcessing {
                    path: path.display().to_string(),
                    operation: "save disc crop".to_string(),
                    source: Box::new(e),
                })?;
            region.path = Some(path);
        }
        Ok(())
    }
}
