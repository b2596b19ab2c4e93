pub mod bbox;
pub mod config;
pub mod errors;
pub mod imageops;
pub mod model;
pub mod overlay;
pub mod pipeline;
pub mod predictor;
pub mod response;
pub mod segmenter;
pub mod traits;

pub mod mocks;

use image::ImageFormat;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub use config::Config;
pub use errors::{Result, SpineDiscError};
pub use model::{DiscClassifierNet, SegmentationNet};
pub use pipeline::{AppContext, PipelineSettings, RequestResult};
pub use response::Response;
pub use traits::*;

/// Uploads found under `input`: the file itself, or every supported image below a
/// directory, in path order.
pub fn collect_uploads(input: &Path) -> Vec<PathBuf> {
    if input.is_file() {
        return vec![input.to_path_buf()];
    }

    let mut uploads: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_supported_image_format(e.path()))
        .map(|e| e.into_path())
        .collect();
    uploads.sort();
    uploads
}

pub fn is_supported_image_format(path: &Path) -> bool {
    ImageFormat::from_path(path)
        .map(|format| format.reading_enabled())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_supported_formats() {
        let test_cases = vec![
            ("scan.png", true),
            ("scan.jpg", true),
            ("scan.jpeg", true),
            ("notes.txt", false),
            ("scan", false),
        ];

        for (filename, expected) in test_cases {
            assert_eq!(is_supported_image_format(Path::new(filename)), expected, "{filename}");
        }
    }

    #[test]
    fn test_collect_uploads_walks_directories() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let nested = temp_dir.path().join("patient_b");
        fs::create_dir_all(&nested)?;
        fs::write(temp_dir.path().join("a.png"), b"")?;
        fs::write(nested.join("b.jpg"), b"")?;
        fs::write(nested.join("readme.txt"), b"")?;

        let uploads = collect_uploads(temp_dir.path());

        assert_eq!(uploads, vec![temp_dir.path().join("a.png"), nested.join("b.jpg")]);
        assert_eq!(collect_uploads(&nested.join("b.jpg")), vec![nested.join("b.jpg")]);
        Ok(())
    }
}
