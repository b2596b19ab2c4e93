use crate::imageops::contours::external_bounding_rects;
use crate::imageops::mask::BinaryMask;

pub const DEFAULT_MARGIN: u32 = 10;
/// Regions at least this tall in mask space usually span several merged discs.
pub const DEFAULT_MAX_MASK_HEIGHT: u32 = 100;

/// Disc candidate in original-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub x_min: u32,
    pub y_min: u32,
    pub x_max: u32,
    pub y_max: u32,
}

impl BoundingBox {
    pub const fn width(&self) -> u32 {
        self.x_max - self.x_min
    }

    pub const fn height(&self) -> u32 {
        self.y_max - self.y_min
    }
}

/// Ratio of original resolution to mask resolution along each axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub x: f64,
    pub y: f64,
}

impl Scale {
    pub fn between(original: (u32, u32), mask: (u32, u32)) -> Self {
        Self {
            x: f64::from(original.0) / f64::from(mask.0.max(1)),
            y: f64::from(original.1) / f64::from(mask.1.max(1)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoxOptions {
    pub margin: u32,
    pub max_mask_height: u32,
}

impl Default for BoxOptions {
    fn default() -> Self {
        Self {
            margin: DEFAULT_MARGIN,
            max_mask_height: DEFAULT_MAX_MASK_HEIGHT,
        }
    }
}

/// Derives disc candidates from a binary mask.
///
/// Every external region of `mask` contributes its enclosing rectangle unless that
/// rectangle is `max_mask_height` pixels tall or more. Survivors are scaled into the
/// original image (truncating toward zero), grown by `margin` on all sides and clamped to
/// `[0, width] x [0, height]`. The result is unordered; an empty result means nothing was
/// detected.
pub fn calculate_bounding_boxes(
    mask: &BinaryMask,
    original_size: (u32, u32),
    scale: Scale,
    options: BoxOptions,
) -> Vec<BoundingBox> {
    let (width, height) = (i64::from(original_size.0), i64::from(original_size.1));
    let margin = i64::from(options.margin);

    external_bounding_rects(mask)
        .into_iter()
        .filter(|rect| rect.height < options.max_mask_height)
        .map(|rect| {
            let x = (f64::from(rect.x) * scale.x) as i64;
            let y = (f64::from(rect.y) * scale.y) as i64;
            let w = (f64::from(rect.width) * scale.x) as i64;
            let h = (f64::from(rect.height) * scale.y) as i64;

            let x_min = (x - margin).clamp(0, width);
            let y_min = (y - margin).clamp(0, height);
            let x_max = (x + w + margin).clamp(x_min, width);
            let y_max = (y + h + margin).clamp(y_min, height);

            BoundingBox {
                x_min: x_min as u32,
                y_min: y_min as u32,
                x_max: x_max as u32,
                y_max: y_max as u32,
            }
        })
        .collect()
}
