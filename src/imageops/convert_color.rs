use image::{Pixel, Rgb};

use crate::imageops::Image;

/// 8-bit HSV in the layout OpenCV uses: hue halved into 0..=180, saturation and value
/// in 0..=255. The three channels are stored in an `Rgb<u8>` container.
pub trait ConvertHsv {
    fn to_hsv(&self) -> Image<Rgb<u8>>;
}

impl ConvertHsv for Image<Rgb<u8>> {
    fn to_hsv(&self) -> Image<Rgb<u8>> {
        let mut hsv = Image::<Rgb<u8>>::new(self.width(), self.height());
        for (x, y, pixel) in self.enumerate_pixels() {
            hsv.put_pixel(x, y, rgb_to_hsv(pixel.to_rgb()));
        }
        hsv
    }
}

pub fn rgb_to_hsv(Rgb([r, g, b]): Rgb<u8>) -> Rgb<u8> {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    let value = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = value - min;

    let saturation = if value > 0.0 { 255.0 * delta / value } else { 0.0 };

    let hue = if delta == 0.0 {
        0.0
    } else if value == r {
        60.0 * (g - b) / delta
    } else if value == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    let hue = if hue < 0.0 { hue + 360.0 } else { hue };

    Rgb([
        (hue / 2.0).round().min(180.0) as u8,
        saturation.round() as u8,
        value as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_colors() {
        assert_eq!(rgb_to_hsv(Rgb([255, 0, 0])), Rgb([0, 255, 255]));
        assert_eq!(rgb_to_hsv(Rgb([0, 255, 0])), Rgb([60, 255, 255]));
        assert_eq!(rgb_to_hsv(Rgb([0, 0, 255])), Rgb([120, 255, 255]));
    }

    #[test]
    fn test_grays_have_no_hue_or_saturation() {
        assert_eq!(rgb_to_hsv(Rgb([0, 0, 0])), Rgb([0, 0, 0]));
        assert_eq!(rgb_to_hsv(Rgb([128, 128, 128])), Rgb([0, 0, 128]));
        assert_eq!(rgb_to_hsv(Rgb([255, 255, 255])), Rgb([0, 0, 255]));
    }

    #[test]
    fn test_magenta_red_wraps_near_180() {
        // hue 340 degrees
        let Rgb([h, s, v]) = rgb_to_hsv(Rgb([255, 0, 85]));
        assert_eq!(h, 170);
        assert_eq!(s, 255);
        assert_eq!(v, 255);
    }

    #[test]
    fn test_image_conversion_keeps_dimensions() {
        let img = Image::<Rgb<u8>>::from_pixel(7, 3, Rgb([255, 0, 0]));
        let hsv = img.to_hsv();
        assert_eq!(hsv.dimensions(), (7, 3));
        assert!(hsv.pixels().all(|p| *p == Rgb([0, 255, 255])));
    }
}
