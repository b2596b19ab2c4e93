use image::GrayImage;
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::point::Point;

/// Axis-aligned pixel rectangle; `width` and `height` count pixels, so a single pixel
/// has size 1x1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Bounding rectangles of the outermost borders of every foreground region, in the
/// order the border tracer discovers them (raster order of each region's first pixel).
/// Borders nested inside a hole of another region are skipped.
pub fn external_bounding_rects(mask: &GrayImage) -> Vec<PixelRect> {
    find_contours::<i32>(mask)
        .iter()
        .filter(|contour| is_external(contour))
        .filter_map(|contour| bounding_rect(&contour.points))
        .collect()
}

fn is_external(contour: &Contour<i32>) -> bool {
    contour.border_type == BorderType::Outer && contour.parent.is_none()
}

pub fn bounding_rect(points: &[Point<i32>]) -> Option<PixelRect> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &points[1..] {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }

    Some(PixelRect {
        x: min_x.max(0) as u32,
        y: min_y.max(0) as u32,
        width: (max_x - min_x + 1) as u32,
        height: (max_y - min_y + 1) as u32,
    })
}
