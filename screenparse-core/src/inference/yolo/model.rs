use std::path::PathBuf;

use ndarray::{ArrayBase, Dim, OwnedRepr};
use serde::{Deserialize, Serialize};

use crate::{
    consts::{BACKGROUND_FILL_VALUE, CXYWH_OFFSET, YOLO_INPUT_HEIGHT, YOLO_INPUT_WIDTH},
    error::Result,
    inference::model::{Model, read_model},
};

pub struct Yolo {
    config: YoloConfig,
}

pub type YoloInput = ArrayBase<OwnedRepr<f32>, Dim<[usize; 4]>>;
pub type YoloOutput = ArrayBase<OwnedRepr<f32>, Dim<[usize; 3]>>;

/// Icon detection model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YoloConfig {
    /// Path to the ONNX weights.
    pub model_path: PathBuf,
    pub required_width: usize,
    pub required_height: usize,
    pub batch_size: usize,
    pub input_channels: usize,
    /// Value of the padding right and below the resized screenshot.
    pub background_fill_value: f32,
    /// Number of leading rows in every prediction column holding `cx, cy, w, h`.
    pub cxywh_size: usize,
    pub intra_threads: usize,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("weights/icon_detect/model.onnx"),
            required_width: YOLO_INPUT_WIDTH as usize,
            required_height: YOLO_INPUT_HEIGHT as usize,
            batch_size: 1,
            input_channels: 3,
            background_fill_value: BACKGROUND_FILL_VALUE,
            cxywh_size: CXYWH_OFFSET,
            intra_threads: 4,
        }
    }
}

impl Yolo {
    pub fn new(config: YoloConfig) -> Self {
        Self { config }
    }
}

impl Default for Yolo {
    fn default() -> Self {
        Self::new(YoloConfig::default())
    }
}

impl Model for Yolo {
    type Input = YoloInput;
    type Output = YoloOutput;
    type Config = YoloConfig;

    const INPUT_NAME: &'static str = "images";
    const OUTPUT_NAME: &'static str = "output0";
    const MODEL_NAME: &'static str = "yolo-icon-detect";

    fn load(&self) -> Result<Vec<u8>> {
        read_model(&self.config.model_path)
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }
}
