use std::fs;
use std::path::Path;

use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::bbox::BoundingBox;
use crate::errors::{Result, SpineDiscError};

/// Outline color reserved for disc boxes. Saturated red does not occur in grayscale MRI.
pub const OUTLINE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const STROKE_WIDTH: u32 = 5;

#[derive(Debug, Clone, Copy)]
pub struct OverlayStyle {
    pub color: Rgb<u8>,
    pub stroke_width: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            color: OUTLINE_COLOR,
            stroke_width: STROKE_WIDTH,
        }
    }
}

/// Returns a copy of `original` with each box outlined. The box edges are inclusive and
/// the stroke grows inward from them.
pub fn render_overlay(original: &RgbImage, boxes: &[BoundingBox], style: OverlayStyle) -> RgbImage {
    let mut canvas = original.clone();
    for b in boxes {
        let outer_w = i64::from(b.width()) + 1;
        let outer_h = i64::from(b.height()) + 1;
        for t in 0..i64::from(style.stroke_width) {
            let (w, h) = (outer_w - 2 * t, outer_h - 2 * t);
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at((i64::from(b.x_min) + t) as i32, (i64::from(b.y_min) + t) as i32)
                .of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut canvas, rect, style.color);
        }
    }
    canvas
}

/// Writes the overlay as PNG, creating the parent directory when needed.
pub fn save_overlay(overlay: &RgbImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SpineDiscError::FileSystem {
            path: parent.to_path_buf(),
            operation: "create overlay directory".to_string(),
            source: e,
        })?;
    }

    overlay
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| SpineDiscError::ImageProcessing {
            path: path.display().to_string(),
            operation: "save overlay".to_string(),
            source: Box::new(e),
        })
}
