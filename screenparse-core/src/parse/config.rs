use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::{
    analysis::reconcile::ReconcileConfig,
    consts::*,
    error::*,
    inference::{caption::OpenAiCaptionConfig, paddle::PaddleOcrConfig, yolo::YoloConfig},
};

/// Construction-time settings of a [`ScreenParser`](crate::parse::ScreenParser).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub icon: YoloConfig,
    pub text: PaddleOcrConfig,
    /// Icons keep the placeholder content when no captioner is configured.
    pub caption: Option<OpenAiCaptionConfig>,
    pub reconcile: ReconcileConfig,
    /// Icon crops handed to the captioner per call.
    pub caption_batch_size: usize,
    pub caption_placeholder: String,
    /// Images analysed concurrently by [`ScreenParser::analyze_batch`](crate::parse::ScreenParser::analyze_batch).
    pub max_concurrent_images: usize,
    /// Budget of a single analysis, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// TrueType/OpenType font overriding the bundled DejaVu Sans for annotation labels.
    pub font_path: Option<PathBuf>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            icon: YoloConfig::default(),
            text: PaddleOcrConfig::default(),
            caption: None,
            reconcile: ReconcileConfig::default(),
            caption_batch_size: CAPTION_BATCH_SIZE,
            caption_placeholder: CAPTION_PLACEHOLDER.to_string(),
            max_concurrent_images: MAX_CONCURRENT_IMAGES,
            timeout_ms: None,
            font_path: None,
        }
    }
}

impl ParserConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).context(IoReadSnafu {
            path: path.to_string_lossy(),
        })?;
        serde_json::from_slice(&data).context(JsonSnafu { stage: "config" })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Per-call tuning knobs.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct ParseOptions {
    /// Confidence floor of the icon detector.
    pub score_threshold: f32,
    /// Produce `annotated_image` in the result.
    pub annotate: bool,
    /// Persist the annotated image and JSON report into `output_directory`.
    pub save_annotated: bool,
    pub output_directory: PathBuf,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            annotate: true,
            save_annotated: false,
            output_directory: PathBuf::from("."),
        }
    }
}

impl ParseOptions {
    pub fn builder() -> ParseOptionsBuilder {
        ParseOptionsBuilder::default()
    }
}
