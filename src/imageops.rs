pub mod contours;
pub mod convert_color;
pub mod mask;

use image::{ImageBuffer, Pixel};

pub type Image<P> = ImageBuffer<P, Vec<<P as Pixel>::Subpixel>>;
