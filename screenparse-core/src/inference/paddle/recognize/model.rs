use std::path::PathBuf;

use ndarray::{ArrayBase, Dim, OwnedRepr};
use serde::{Deserialize, Serialize};

use crate::{
    consts::PADDLE_REC_INPUT_HEIGHT,
    error::Result,
    inference::model::{Model, read_model},
};

pub struct PaddleRec {
    config: PaddleRecConfig,
}

pub type PaddleRecInput = ArrayBase<OwnedRepr<f32>, Dim<[usize; 4]>>;
pub type PaddleRecOutput = ArrayBase<OwnedRepr<f32>, Dim<[usize; 3]>>;

/// Configuration for the PaddleOCR text recognition model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaddleRecConfig {
    /// Path to the ONNX weights.
    pub model_path: PathBuf,

    /// Character dictionary, one entry per line. When absent the dictionary
    /// is read from the `character` entry of the model metadata.
    pub dict_path: Option<PathBuf>,

    /// Text line crops are resized to this height, width follows the aspect
    /// ratio.
    ///
    /// Typical values: 32, 48, 64
    /// Default: 48
    pub required_height: usize,

    /// Upper bound for the resized crop width.
    pub max_width: usize,

    pub batch_size: usize,

    pub input_channels: usize,
}

impl Default for PaddleRecConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("weights/ocr/rec.onnx"),
            dict_path: None,
            required_height: PADDLE_REC_INPUT_HEIGHT as usize,
            max_width: 3200,
            batch_size: 1,
            input_channels: 3,
        }
    }
}

impl PaddleRec {
    pub fn new(config: PaddleRecConfig) -> Self {
        Self { config }
    }
}

impl Default for PaddleRec {
    fn default() -> Self {
        Self::new(PaddleRecConfig::default())
    }
}

impl Model for PaddleRec {
    type Input = PaddleRecInput;
    type Output = PaddleRecOutput;
    type Config = PaddleRecConfig;

    const INPUT_NAME: &'static str = "x";
    const OUTPUT_NAME: &'static str = "fetch_name_0";
    const MODEL_NAME: &'static str = "paddle-ocr-rec";

    fn load(&self) -> Result<Vec<u8>> {
        read_model(&self.config.model_path)
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }
}
