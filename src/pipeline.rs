use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::bbox::{calculate_bounding_boxes, BoundingBox, BoxOptions, Scale};
use crate::errors::{FailureKind, Result, SpineDiscError};
use crate::imageops::mask::{self, DEFAULT_THRESHOLD};
use crate::overlay::{render_overlay, save_overlay, OverlayStyle};
use crate::predictor::{self, PredictionReport};
use crate::response::{DiscImage, Response};
use crate::segmenter::{extract_disc_regions, CropStore, DiscRegion};
use crate::traits::{DiscClassifier, SegmentationModel};

pub const OVERLAY_FILE_NAME: &str = "processed_image.png";
pub const CROP_DIR_NAME: &str = "discs";
pub const DEFAULT_URL_PREFIX: &str = "/static/output";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Root under which every request gets its own working directory.
    pub output_dir: PathBuf,
    /// Public prefix that `output_dir` is served under.
    pub url_prefix: String,
    pub mask_threshold: f32,
    pub boxes: BoxOptions,
    pub overlay: OverlayStyle,
}

impl PipelineSettings {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            url_prefix: DEFAULT_URL_PREFIX.to_string(),
            mask_threshold: DEFAULT_THRESHOLD,
            boxes: BoxOptions::default(),
            overlay: OverlayStyle::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscPrediction {
    pub region: DiscRegion,
    pub report: PredictionReport,
}

/// Everything produced for one upload. `discs` is in rank order.
#[derive(Debug, Clone)]
pub struct RequestResult {
    pub request_id: Uuid,
    pub overlay_path: PathBuf,
    pub boxes: Vec<BoundingBox>,
    pub discs: Vec<DiscPrediction>,
}

/// Models loaded once per process plus the settings every request shares.
///
/// A model slot is `None` when its weights could not be loaded; requests then fail
/// before any stage runs.
pub struct AppContext<S: SegmentationModel, C: DiscClassifier> {
    segmenter: Option<S>,
    classifier: Option<C>,
    settings: PipelineSettings,
}

impl<S: SegmentationModel, C: DiscClassifier> AppContext<S, C> {
    pub const fn new(segmenter: Option<S>, classifier: Option<C>, settings: PipelineSettings) -> Self {
        Self {
            segmenter,
            classifier,
            settings,
        }
    }

    pub const fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Runs the full pipeline for one upload.
    ///
    /// Every request writes into a fresh `<output_dir>/<request id>/` directory, so
    /// concurrent requests never see each other's crops. The directory is removed again
    /// if any stage fails.
    pub fn process(&self, upload: &Path) -> Result<RequestResult> {
        let original = load_upload(upload)?;

        let segmenter = self
            .segmenter
            .as_ref()
            .ok_or_else(|| SpineDiscError::ModelUnavailable {
                model: "segmentation".to_string(),
            })?;
        let classifier = self
            .classifier
            .as_ref()
            .ok_or_else(|| SpineDiscError::ModelUnavailable {
                model: "classification".to_string(),
            })?;

        let request_id = Uuid::new_v4();
        let work_dir = self.settings.output_dir.join(request_id.to_string());
        let span = info_span!("request", %request_id, upload = %upload.display());
        let _enter = span.enter();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_stages(segmenter, classifier, &original, &work_dir)
        }))
        .unwrap_or_else(|payload| Err(SpineDiscError::Panicked {
            message: panic_message(payload.as_ref()),
        }));

        match outcome {
            Ok((overlay_path, boxes, discs)) => {
                info!(discs = discs.len(), "request complete");
                Ok(RequestResult {
                    request_id,
                    overlay_path,
                    boxes,
                    discs,
                })
            }
            Err(err) => {
                if work_dir.exists() {
                    if let Err(cleanup) = fs::remove_dir_all(&work_dir) {
                        warn!(error = %cleanup, dir = %work_dir.display(), "failed to remove working directory");
                    }
                }
                Err(err)
            }
        }
    }

    fn run_stages(
        &self,
        segmenter: &S,
        classifier: &C,
        original: &RgbImage,
        work_dir: &Path,
    ) -> Result<(PathBuf, Vec<BoundingBox>, Vec<DiscPrediction>)> {
        let probability = segmenter.segment(original)?;
        let side = segmenter.input_size();
        if probability.dimensions() != (side, side) {
            return Err(SpineDiscError::Model {
                operation: "segment upload".to_string(),
                source: format!(
                    "mask is {}x{}, expected {side}x{side}",
                    probability.width(),
                    probability.height()
                )
                .into(),
            });
        }
        let binary = mask::threshold(&probability, self.settings.mask_threshold);
        let scale = Scale::between(original.dimensions(), binary.dimensions());
        let boxes = calculate_bounding_boxes(&binary, original.dimensions(), scale, self.settings.boxes);
        info!(boxes = boxes.len(), "computed disc bounding boxes");

        let overlay_path = work_dir.join(OVERLAY_FILE_NAME);
        let overlay = render_overlay(original, &boxes, self.settings.overlay);
        save_overlay(&overlay, &overlay_path)?;
        debug!(path = %overlay_path.display(), "overlay saved");

        // Disc extraction works from the persisted overlay only.
        let overlay = image::open(&overlay_path)
            .map_err(|e| SpineDiscError::OverlayNotFound {
                reason: format!("cannot read {}: {e}", overlay_path.display()),
            })?
            .to_rgb8();

        let store = CropStore::new(work_dir.join(CROP_DIR_NAME));
        store.reset()?;
        let mut regions = extract_disc_regions(&overlay, original)?;
        if regions.is_empty() && !boxes.is_empty() {
            return Err(SpineDiscError::OverlayNotFound {
                reason: format!("{} boxes were drawn but no outline was located", boxes.len()),
            });
        }
        if regions.len() != boxes.len() {
            // overlapping boxes merge into a single outline
            warn!(boxes = boxes.len(), regions = regions.len(), "outline count differs from box count");
        }
        store.persist(&mut regions)?;

        let discs = regions
            .into_iter()
            .map(|region| {
                let report = predictor::predict(classifier, &region)?;
                debug!(rank = region.rank, grade = report.pfirrman_grade, "disc graded");
                Ok(DiscPrediction { region, report })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((overlay_path, boxes, discs))
    }

    /// Runs one request and converts the outcome into the caller-facing body. Internal
    /// error detail goes to the log only.
    pub fn respond(&self, upload: &Path) -> Response {
        match self.process(upload) {
            Ok(result) => self.to_response(&result),
            Err(err) => {
                match err.kind() {
                    FailureKind::ClientError => warn!(error = %err, upload = %upload.display(), "rejected upload"),
                    FailureKind::ProcessingFailure => error!(error = ?err, upload = %upload.display(), "processing failed"),
                }
                Response::failure(err.public_message())
            }
        }
    }

    /// Discs whose crop was never written have no URL and are left out.
    pub fn to_response(&self, result: &RequestResult) -> Response {
        Response::Success {
            output_image_url: self.url_for(&result.overlay_path),
            disc_images: result
                .discs
                .iter()
                .filter_map(|disc| match disc.region.path.as_deref() {
                    Some(path) => Some(DiscImage {
                        url: self.url_for(path),
                        message: disc.report.to_string(),
                    }),
                    None => {
                        warn!(rank = disc.region.rank, "disc crop was not persisted; omitted from response");
                        None
                    }
                })
                .collect(),
        }
    }

    /// Public URL of a file under `output_dir`.
    pub fn url_for(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.settings.output_dir).unwrap_or(path);
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}", self.settings.url_prefix.trim_end_matches('/'), relative)
    }
}

/// Validates and decodes an upload. Nothing is written when this fails.
pub fn load_upload(upload: &Path) -> Result<RgbImage> {
    let has_name = upload
        .file_name()
        .map(|name| !name.is_empty())
        .unwrap_or(false);
    if !has_name {
        return Err(SpineDiscError::InvalidInput {
            reason: "No selected file".to_string(),
        });
    }
    if !upload.is_file() {
        return Err(SpineDiscError::InvalidInput {
            reason: "No file part in the request".to_string(),
        });
    }

    // the decoder follows the file content, not the extension
    ImageReader::open(upload)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(image::ImageError::from)
        .and_then(|reader| reader.decode())
        .map(|image| image.to_rgb8())
        .map_err(|_| SpineDiscError::InvalidInput {
            reason: format!(
                "Uploaded file is not a readable image: {}",
                upload.file_name().unwrap_or_default().to_string_lossy()
            ),
        })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imageops::contours::PixelRect;
    use crate::imageops::mask::ProbabilityMask;
    use crate::mocks::{MockDiscClassifier, MockSegmentationModel};
    use image::{ImageFormat, Luma, Rgb};
    use tempfile::TempDir;

    type MockContext = AppContext<MockSegmentationModel, MockDiscClassifier>;

    /// Returns a mask one pixel short of its declared size.
    struct ShortMaskSegmenter;

    impl SegmentationModel for ShortMaskSegmenter {
        fn input_size(&self) -> u32 {
            256
        }

        fn segment(&self, _image: &RgbImage) -> Result<ProbabilityMask> {
            Ok(ProbabilityMask::from_pixel(256, 255, Luma([0.0])))
        }
    }

    struct PanickingSegmenter;

    impl SegmentationModel for PanickingSegmenter {
        fn input_size(&self) -> u32 {
            256
        }

        fn segment(&self, _image: &RgbImage) -> Result<ProbabilityMask> {
            panic!("segmentation kernel crashed")
        }
    }

    fn entries(dir: &Path) -> usize {
        fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    fn write_upload(dir: &Path) -> Result<PathBuf> {
        let path = dir.join("scan.png");
        RgbImage::from_pixel(512, 512, Rgb([60, 60, 60])).save(&path)?;
        Ok(path)
    }

    fn context(output_dir: &Path, segmenter: MockSegmentationModel) -> MockContext {
        AppContext::new(
            Some(segmenter),
            Some(MockDiscClassifier::default()),
            PipelineSettings::new(output_dir),
        )
    }

    #[test]
    fn test_url_for_relative_paths() {
        let ctx = context(Path::new("/srv/static/output"), MockSegmentationModel::new(256));
        let url = ctx.url_for(Path::new("/srv/static/output/abc/discs/disc_1.png"));
        assert_eq!(url, "/static/output/abc/discs/disc_1.png");
    }

    #[test]
    fn test_load_upload_rejects_missing_file() {
        let err = load_upload(Path::new("/definitely/not/here.png")).unwrap_err();
        assert!(matches!(err, SpineDiscError::InvalidInput { .. }));

        let err = load_upload(Path::new("")).unwrap_err();
        assert_eq!(err.public_message(), "No selected file");
    }

    #[test]
    fn test_load_upload_rejects_non_image() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("notes.png");
        fs::write(&path, b"not an image")?;

        let err = load_upload(&path).unwrap_err();
        assert_eq!(err.kind(), FailureKind::ClientError);
        Ok(())
    }

    #[test]
    fn test_process_orders_discs_and_persists_crops() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let upload = write_upload(temp_dir.path())?;
        let output_dir = temp_dir.path().join("output");
        // mask space: three discs, listed bottom first
        let segmenter = MockSegmentationModel::new(256)
            .with_region(100, 200, 40, 12)
            .with_region(60, 40, 40, 12)
            .with_region(140, 120, 40, 12);
        let ctx = context(&output_dir, segmenter);

        let result = ctx.process(&upload)?;

        assert_eq!(result.boxes.len(), 3);
        assert!(result.overlay_path.exists());
        let ranks: Vec<usize> = result.discs.iter().map(|d| d.region.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        let tops: Vec<u32> = result.discs.iter().map(|d| d.region.rect.y).collect();
        assert!(tops.windows(2).all(|w| w[0] <= w[1]));
        for disc in &result.discs {
            let path = disc.region.path.as_ref().expect("crop persisted");
            assert!(path.exists());
            assert_eq!(disc.report.pfirrman_grade, 3);
        }
        Ok(())
    }

    #[test]
    fn test_no_detection_is_an_empty_success() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let upload = write_upload(temp_dir.path())?;
        let ctx = context(&temp_dir.path().join("output"), MockSegmentationModel::new(256));

        let response = ctx.respond(&upload);

        match response {
            Response::Success {
                output_image_url,
                disc_images,
            } => {
                assert!(output_image_url.ends_with("/processed_image.png"));
                assert!(disc_images.is_empty());
            }
            Response::Failure { error } => panic!("unexpected failure: {error}"),
        }
        Ok(())
    }

    #[test]
    fn test_missing_model_fails_without_side_effects() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let upload = write_upload(temp_dir.path())?;
        let output_dir = temp_dir.path().join("output");
        let ctx: MockContext = AppContext::new(
            Some(MockSegmentationModel::new(256).with_region(10, 10, 20, 10)),
            None,
            PipelineSettings::new(&output_dir),
        );

        let err = ctx.process(&upload).unwrap_err();

        assert!(matches!(err, SpineDiscError::ModelUnavailable { .. }));
        assert!(!output_dir.exists());
        Ok(())
    }

    #[test]
    fn test_load_upload_detects_format_from_content() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let scan = RgbImage::from_pixel(16, 16, Rgb([10, 20, 30]));
        let misnamed = temp_dir.path().join("scan.jpg");
        let bare = temp_dir.path().join("scan");
        scan.save_with_format(&misnamed, ImageFormat::Png)?;
        scan.save_with_format(&bare, ImageFormat::Png)?;

        for path in [misnamed, bare] {
            let loaded = load_upload(&path)?;
            assert_eq!(loaded.dimensions(), (16, 16));
            assert_eq!(*loaded.get_pixel(3, 3), Rgb([10, 20, 30]));
        }
        Ok(())
    }

    #[test]
    fn test_drawn_boxes_without_outline_fail_and_clean_up() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let upload = write_upload(temp_dir.path())?;
        let output_dir = temp_dir.path().join("output");
        let settings = PipelineSettings {
            overlay: OverlayStyle {
                color: Rgb([0, 0, 255]),
                ..OverlayStyle::default()
            },
            ..PipelineSettings::new(&output_dir)
        };
        let ctx = AppContext::new(
            Some(MockSegmentationModel::new(256).with_region(60, 60, 40, 12)),
            Some(MockDiscClassifier::default()),
            settings,
        );

        let err = ctx.process(&upload).unwrap_err();
        assert!(matches!(err, SpineDiscError::OverlayNotFound { .. }), "{err:?}");
        assert_eq!(entries(&output_dir), 0);

        assert_eq!(
            ctx.respond(&upload),
            Response::failure("Failed to process the image: no disc outlines found in overlay")
        );
        assert_eq!(entries(&output_dir), 0);
        Ok(())
    }

    #[test]
    fn test_mask_of_wrong_size_is_rejected() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let upload = write_upload(temp_dir.path())?;
        let output_dir = temp_dir.path().join("output");
        let ctx = AppContext::new(
            Some(ShortMaskSegmenter),
            Some(MockDiscClassifier::default()),
            PipelineSettings::new(&output_dir),
        );

        let err = ctx.process(&upload).unwrap_err();

        assert!(matches!(err, SpineDiscError::Model { .. }), "{err:?}");
        assert_eq!(entries(&output_dir), 0);
        Ok(())
    }

    #[test]
    fn test_panicking_stage_becomes_processing_failure() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let upload = write_upload(temp_dir.path())?;
        let output_dir = temp_dir.path().join("output");
        let ctx = AppContext::new(
            Some(PanickingSegmenter),
            Some(MockDiscClassifier::default()),
            PipelineSettings::new(&output_dir),
        );

        let err = ctx.process(&upload).unwrap_err();
        match &err {
            SpineDiscError::Panicked { message } => assert_eq!(message, "segmentation kernel crashed"),
            other => panic!("expected panic to be contained, got {other:?}"),
        }
        assert_eq!(err.kind(), FailureKind::ProcessingFailure);

        assert_eq!(ctx.respond(&upload), Response::failure("Failed to process the image"));
        assert_eq!(entries(&output_dir), 0);
        Ok(())
    }

    #[test]
    fn test_unpersisted_disc_is_left_out_of_response() -> Result<()> {
        let ctx = context(Path::new("/srv/out"), MockSegmentationModel::new(256));
        let report = predictor::fuse(&MockDiscClassifier::default().output)?;
        let disc = |rank: usize, path: Option<PathBuf>| DiscPrediction {
            region: DiscRegion {
                rank,
                rect: PixelRect { x: 0, y: 0, width: 4, height: 4 },
                image: RgbImage::new(4, 4),
                path,
            },
            report,
        };
        let result = RequestResult {
            request_id: Uuid::nil(),
            overlay_path: PathBuf::from("/srv/out/req/processed_image.png"),
            boxes: Vec::new(),
            discs: vec![disc(1, None), disc(2, Some(PathBuf::from("/srv/out/req/discs/disc_2.png")))],
        };

        match ctx.to_response(&result) {
            Response::Success { disc_images, .. } => {
                let urls: Vec<&str> = disc_images.iter().map(|d| d.url.as_str()).collect();
                assert_eq!(urls, vec!["/static/output/req/discs/disc_2.png"]);
            }
            Response::Failure { error } => panic!("unexpected failure: {error}"),
        }
        Ok(())
    }
}
