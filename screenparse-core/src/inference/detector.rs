//! Backend-neutral contracts for the three model roles of the pipeline.
//!
//! Concrete backends live next to this module (`yolo`, `paddle`, `caption`);
//! the orchestrator only ever sees these traits.

use async_trait::async_trait;
use image::DynamicImage;

use crate::{analysis::bbox::Bbox, error::Result};

/// One OCR hit: a unit-square box, the recognized string and its confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct TextDetection {
    pub bbox: Bbox,
    pub text: String,
    pub confidence: f32,
    /// Interactivity reported by the engine, if it knows better than the
    /// kind-based default.
    pub interactive: Option<bool>,
}

impl TextDetection {
    pub fn new(bbox: Bbox, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            text: text.into(),
            confidence,
            interactive: None,
        }
    }
}

/// One icon/widget hit: a unit-square box and the detection score.
#[derive(Debug, Clone, PartialEq)]
pub struct IconDetection {
    pub bbox: Bbox,
    pub score: f32,
    pub interactive: Option<bool>,
}

impl IconDetection {
    pub fn new(bbox: Bbox, score: f32) -> Self {
        Self {
            bbox,
            score,
            interactive: None,
        }
    }
}

/// OCR engine adapter.
///
/// Implementations filter out detections under their own confidence floor;
/// callers never re-filter.
pub trait TextDetector: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, image: &DynamicImage) -> Result<Vec<TextDetection>>;
}

/// Icon/widget detection model adapter. Returned boxes carry no label.
pub trait IconDetector: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, image: &DynamicImage, score_threshold: f32) -> Result<Vec<IconDetection>>;
}

/// Functional description generator for icon crops.
#[async_trait]
pub trait Captioner: Send + Sync {
    fn name(&self) -> &str;

    /// Pixel size crops are resized to before being handed over.
    fn crop_size(&self) -> (u32, u32);

    /// Captions a batch of crops. The outer error fails the whole batch; the
    /// inner results fail single crops. Results are positional.
    async fn caption_batch(&self, crops: &[DynamicImage]) -> Result<Vec<Result<String>>>;
}
