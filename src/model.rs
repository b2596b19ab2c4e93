use std::path::Path;

use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::session::{builder::SessionBuilder, Session};
use ort::value::TensorRef;
use parking_lot::Mutex;
use tracing::info;

use crate::errors::{Result, SpineDiscError};
use crate::imageops::mask::ProbabilityMask;
use crate::predictor::{CategoricalHeads, ClassifierOutput, BINARY_HEADS};
use crate::traits::{DiscClassifier, SegmentationModel};

pub const SEGMENTATION_INPUT_SIZE: u32 = 256;
pub const CLASSIFIER_INPUT_SIZE: u32 = 224;

fn model_error(operation: impl Into<String>, err: impl std::fmt::Display) -> SpineDiscError {
    SpineDiscError::Model {
        operation: operation.into(),
        source: err.to_string().into(),
    }
}

/// A single-input ONNX session whose outputs are read back in declaration order.
struct OnnxSession {
    session: Mutex<Session>,
    input_name: String,
    output_names: Vec<String>,
    input_shape: Vec<i64>,
}

impl OnnxSession {
    fn load(model_path: &Path) -> Result<Self> {
        let session = SessionBuilder::new()
            .map_err(|e| model_error("initialize session builder", e))?
            .with_memory_pattern(true)
            .map_err(|e| model_error("enable memory pattern", e))?
            .commit_from_file(model_path)
            .map_err(|e| model_error(format!("load model file: {}", model_path.display()), e))?;

        let input = session.inputs.first().ok_or_else(|| {
            model_error(
                format!("read model inputs: {}", model_path.display()),
                "model declares no inputs",
            )
        })?;
        let input_name = input.name.clone();
        let input_shape = input
            .input_type
            .tensor_shape()
            .map(|shape| shape.iter().copied().collect())
            .unwrap_or_default();
        let output_names = session.outputs.iter().map(|o| o.name.clone()).collect();

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_names,
            input_shape,
        })
    }

    /// Static size of input dimension `axis`, or `fallback` when the model leaves it dynamic.
    fn input_dim(&self, axis: usize, fallback: u32) -> u32 {
        self.input_shape
            .get(axis)
            .copied()
            .filter(|&d| d > 0)
            .map_or(fallback, |d| d as u32)
    }

    fn run(&self, tensor: ArrayView4<f32>) -> Result<Vec<Vec<f32>>> {
        let standard = tensor.as_standard_layout();
        let input =
            TensorRef::from_array_view(&standard).map_err(|e| model_error("create input tensor", e))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| model_error("run session", e))?;

        self.output_names
            .iter()
            .map(|name| {
                outputs[name.as_str()]
                    .try_extract_array::<f32>()
                    .map(|array| array.iter().copied().collect())
                    .map_err(|e| model_error(format!("extract output `{name}`"), e))
            })
            .collect()
    }
}

/// U-Net disc segmentation exported to ONNX. Input is NCHW RGB scaled to [0, 1];
/// output is a single-channel map at the input resolution.
pub struct SegmentationNet {
    image_size: u32,
    apply_sigmoid: bool,
    session: OnnxSession,
}

impl SegmentationNet {
    /// `apply_sigmoid` should be set when the exported graph ends in logits.
    pub fn new(model_path: &Path, apply_sigmoid: bool) -> Result<Self> {
        let session = OnnxSession::load(model_path)?;
        let image_size = session.input_dim(2, SEGMENTATION_INPUT_SIZE);

        // initialize model
        let side = image_size as usize;
        session.run(Array4::<f32>::zeros((1, 3, side, side)).view())?;

        info!(path = %model_path.display(), image_size, "segmentation model loaded");
        Ok(Self {
            image_size,
            apply_sigmoid,
            session,
        })
    }
}

impl SegmentationModel for SegmentationNet {
    fn input_size(&self) -> u32 {
        self.image_size
    }

    fn segment(&self, image: &RgbImage) -> Result<ProbabilityMask> {
        let tensor = preprocess(image, self.image_size);
        let outputs = self.session.run(tensor.view())?;
        let mask = outputs
            .into_iter()
            .next()
            .ok_or_else(|| model_error("read segmentation output", "model produced no outputs"))?;
        postprocess_mask(mask, self.image_size, self.apply_sigmoid)
    }
}

/// Resizes to the network resolution and lays the image out as a (1, 3, H, W) tensor
/// in [0, 1].
pub fn preprocess(image: &RgbImage, image_size: u32) -> Array4<f32> {
    let image = imageops::resize(image, image_size, image_size, FilterType::CatmullRom);
    image
        .as_ndarray3()
        .slice_move(s![NewAxis, .., .., ..])
        .map(|v| f32::from(*v) / 255.0)
}

pub fn postprocess_mask(values: Vec<f32>, image_size: u32, apply_sigmoid: bool) -> Result<ProbabilityMask> {
    let expected = (image_size * image_size) as usize;
    if values.len() != expected {
        return Err(model_error(
            "reshape segmentation output",
            format!("expected {expected} values, got {}", values.len()),
        ));
    }

    let values = if apply_sigmoid {
        values.into_iter().map(|v| 1.0 / (1.0 + (-v).exp())).collect()
    } else {
        values
    };
    ProbabilityMask::from_raw(image_size, image_size, values)
        .ok_or_else(|| model_error("build probability mask", "buffer size mismatch"))
}

/// ResNet50-backed disc classifier split across two exported models: one carrying the
/// categorical heads (Pfirrman, Modic) and one carrying the six binary heads.
pub struct DiscClassifierNet {
    image_size: u32,
    categorical: OnnxSession,
    binary: OnnxSession,
}

impl DiscClassifierNet {
    pub fn new(categorical_path: &Path, binary_path: &Path) -> Result<Self> {
        let categorical = OnnxSession::load(categorical_path)?;
        let binary = OnnxSession::load(binary_path)?;
        let image_size = categorical.input_dim(1, CLASSIFIER_INPUT_SIZE);

        let side = image_size as usize;
        let warm_up = Array4::<f32>::zeros((1, side, side, 3));
        categorical.run(warm_up.view())?;
        binary.run(warm_up.view())?;

        info!(
            categorical = %categorical_path.display(),
            binary = %binary_path.display(),
            image_size,
            "disc classifier loaded"
        );
        Ok(Self {
            image_size,
            categorical,
            binary,
        })
    }
}

impl DiscClassifier for DiscClassifierNet {
    fn input_size(&self) -> u32 {
        self.image_size
    }

    fn classify(&self, tensor: ArrayView4<f32>) -> Result<ClassifierOutput> {
        let mut heads = self.categorical.run(tensor)?.into_iter();
        let (pfirrman, modic) = match (heads.next(), heads.next()) {
            (Some(pfirrman), Some(modic)) => (pfirrman, modic),
            _ => {
                return Err(model_error(
                    "read categorical heads",
                    "expected Pfirrman and Modic outputs",
                ))
            }
        };

        let binary = flatten_binary_heads(self.binary.run(tensor)?)?;

        Ok(ClassifierOutput {
            categorical: CategoricalHeads { pfirrman, modic },
            binary,
        })
    }
}

/// Accepts either one output holding all six probabilities or six single-value outputs.
pub fn flatten_binary_heads(outputs: Vec<Vec<f32>>) -> Result<Vec<f32>> {
    match outputs.len() {
        1 => Ok(outputs.into_iter().flatten().collect()),
        BINARY_HEADS => outputs
            .iter()
            .map(|head| head.first().copied())
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| model_error("read binary heads", "empty binary head")),
        n => Err(model_error(
            "read binary heads",
            format!("expected 1 or {BINARY_HEADS} outputs, got {n}"),
        )),
    }
}
