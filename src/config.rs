use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::bbox::BoxOptions;
use crate::imageops::mask::DEFAULT_THRESHOLD;
use crate::overlay::OverlayStyle;
use crate::pipeline::{PipelineSettings, DEFAULT_URL_PREFIX};

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Spine MRI image, or a directory of images processed as independent uploads
    pub input: PathBuf,

    #[arg(short, long, default_value = "static/output")]
    pub output_dir: PathBuf,

    #[arg(short, long)]
    pub segmentation_model: PathBuf,

    /// Model carrying the Pfirrman and Modic heads
    #[arg(short, long)]
    pub categorical_model: PathBuf,

    /// Model carrying the six binary finding heads
    #[arg(short, long)]
    pub binary_model: PathBuf,

    /// Apply a sigmoid to the segmentation output (set to false if the graph already ends in one)
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub segmentation_logits: bool,

    #[arg(long, default_value_t = DEFAULT_THRESHOLD, value_parser = check_probability)]
    pub mask_threshold: f32,

    #[arg(long, default_value_t = 10)]
    pub margin: u32,

    /// Mask-space regions at least this tall are discarded
    #[arg(long, default_value_t = 100)]
    pub max_box_height: u32,

    #[arg(long, default_value = DEFAULT_URL_PREFIX)]
    pub url_prefix: String,

    /// Number of uploads processed concurrently
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub jobs: u32,
}

impl Config {
    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            output_dir: self.output_dir.clone(),
            url_prefix: self.url_prefix.clone(),
            mask_threshold: self.mask_threshold,
            boxes: BoxOptions {
                margin: self.margin,
                max_mask_height: self.max_box_height,
            },
            overlay: OverlayStyle::default(),
        }
    }
}

fn check_probability(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|e| format!("{s} is not a number: {e}"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{s} is outside [0, 1]"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 8] = [
        "spine-disc",
        "scan.png",
        "-s",
        "seg.onnx",
        "-c",
        "cat.onnx",
        "-b",
        "bin.onnx",
    ];

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(REQUIRED).expect("valid arguments");

        assert_eq!(config.output_dir, PathBuf::from("static/output"));
        assert_eq!(config.mask_threshold, 0.5);
        assert!(config.segmentation_logits);
        assert_eq!(config.jobs, 1);

        let settings = config.settings();
        assert_eq!(settings.boxes.margin, 10);
        assert_eq!(settings.boxes.max_mask_height, 100);
        assert_eq!(settings.url_prefix, "/static/output");
    }

    #[test]
    fn test_threshold_must_be_probability() {
        let args = REQUIRED.iter().copied().chain(["--mask-threshold", "1.5"]);
        assert!(Config::try_parse_from(args).is_err());
    }

    #[test]
    fn test_logits_flag_can_be_disabled() {
        let args = REQUIRED.iter().copied().chain(["--segmentation-logits", "false"]);
        let config = Config::try_parse_from(args).expect("valid arguments");
        assert!(!config.segmentation_logits);
    }
}
