use std::path::PathBuf;

use ndarray::{ArrayBase, Dim, OwnedRepr};
use serde::{Deserialize, Serialize};

use crate::{
    consts::PADDLE_DET_INPUT_SIZE,
    error::Result,
    inference::model::{Model, read_model},
};

pub struct PaddleDet {
    config: PaddleDetConfig,
}

pub type PaddleDetInput = ArrayBase<OwnedRepr<f32>, Dim<[usize; 4]>>;
pub type PaddleDetOutput = ArrayBase<OwnedRepr<f32>, Dim<[usize; 3]>>;

/// Configuration for the PaddleOCR text detection model.
///
/// Controls the model input requirements and the DB (Differentiable
/// Binarization) post-processing that turns the probability map into boxes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaddleDetConfig {
    /// Path to the ONNX weights.
    pub model_path: PathBuf,

    /// Required input width. Screenshots are resized to fit within it while
    /// keeping their aspect ratio; must be a multiple of 32.
    pub required_width: usize,

    /// Required input height, same constraints as `required_width`.
    pub required_height: usize,

    pub batch_size: usize,

    pub input_channels: usize,

    /// Tensor value of the padding around the resized screenshot.
    pub background_fill_value: f32,

    /// Probability above which a pixel of the map counts as text.
    ///
    /// Typical range: 0.1 - 0.5
    /// Default: 0.3
    pub det_db_thresh: f32,

    /// Minimum mean probability inside a candidate box for it to be kept.
    ///
    /// Typical range: 0.3 - 0.8
    /// Default: 0.6
    pub det_db_box_thresh: f32,

    /// Expansion ratio applied to shrunken text kernels. The box is grown by
    /// `area * ratio / perimeter` on every side.
    ///
    /// Typical range: 1.0 - 2.0
    /// Default: 1.5
    pub det_db_unclip_ratio: f32,

    /// Maximum number of contours examined per image.
    pub max_candidates: usize,

    /// Candidates whose shorter side (in map pixels) is below this are noise.
    pub min_side_thresh: f32,

    /// Pixels added around each box before it is cropped for recognition.
    pub text_padding: f32,
}

impl Default for PaddleDetConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("weights/ocr/det.onnx"),
            required_width: PADDLE_DET_INPUT_SIZE as usize,
            required_height: PADDLE_DET_INPUT_SIZE as usize,
            batch_size: 1,
            input_channels: 3,
            background_fill_value: 0.5,
            det_db_thresh: 0.3,
            det_db_box_thresh: 0.6,
            det_db_unclip_ratio: 1.5,
            max_candidates: 1000,
            min_side_thresh: 3.0,
            text_padding: 2.0,
        }
    }
}

impl PaddleDet {
    pub fn new(config: PaddleDetConfig) -> Self {
        Self { config }
    }
}

impl Default for PaddleDet {
    fn default() -> Self {
        Self::new(PaddleDetConfig::default())
    }
}

impl Model for PaddleDet {
    type Input = PaddleDetInput;
    type Output = PaddleDetOutput;
    type Config = PaddleDetConfig;

    const INPUT_NAME: &'static str = "x";
    const OUTPUT_NAME: &'static str = "fetch_name_0";
    const MODEL_NAME: &'static str = "paddle-ocr-det";

    fn load(&self) -> Result<Vec<u8>> {
        read_model(&self.config.model_path)
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }
}
