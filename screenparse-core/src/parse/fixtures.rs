//! In-process detectors and captioners for pipeline tests.

use std::{
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use image::DynamicImage;

use crate::{
    analysis::bbox::Bbox,
    error::{Result, ScreenParseError},
    inference::detector::{Captioner, IconDetection, IconDetector, TextDetection, TextDetector},
};

pub fn text(xyxy: [f32; 4], content: &str, confidence: f32) -> TextDetection {
    TextDetection::new(Bbox::from_xyxy(xyxy), content, confidence)
}

pub fn icon(xyxy: [f32; 4], score: f32) -> IconDetection {
    IconDetection::new(Bbox::from_xyxy(xyxy), score)
}

/// Returns the same detections on every call, or fails every call.
pub struct FakeText {
    detections: Vec<TextDetection>,
    fail: bool,
}

impl FakeText {
    pub fn new(detections: Vec<TextDetection>) -> Self {
        Self {
            detections,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            detections: Vec::new(),
            fail: true,
        }
    }
}

impl TextDetector for FakeText {
    fn name(&self) -> &str {
        "fake-ocr"
    }

    fn detect(&self, _image: &DynamicImage) -> Result<Vec<TextDetection>> {
        if self.fail {
            return Err(ScreenParseError::Detection {
                detector: self.name().to_string(),
                message: "engine crashed".to_string(),
            });
        }
        Ok(self.detections.clone())
    }
}

/// Returns its detections at or above the requested threshold.
pub struct FakeIcons {
    detections: Vec<IconDetection>,
    delay: Option<Duration>,
}

impl FakeIcons {
    pub fn new(detections: Vec<IconDetection>) -> Self {
        Self {
            detections,
            delay: None,
        }
    }

    /// Blocks the calling thread for `delay` before answering.
    pub fn slow(detections: Vec<IconDetection>, delay: Duration) -> Self {
        Self {
            detections,
            delay: Some(delay),
        }
    }
}

impl IconDetector for FakeIcons {
    fn name(&self) -> &str {
        "fake-icons"
    }

    fn detect(&self, _image: &DynamicImage, score_threshold: f32) -> Result<Vec<IconDetection>> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(self
            .detections
            .iter()
            .filter(|det| det.score >= score_threshold)
            .cloned()
            .collect())
    }
}

/// Captions crop `n` (counted across calls) as `icon-n`.
#[derive(Default)]
pub struct FakeCaptioner {
    seen: AtomicUsize,
    fail_every: Option<usize>,
    batches: Mutex<Vec<usize>>,
}

impl FakeCaptioner {
    /// Fails every crop whose running index is a multiple of `n`.
    pub fn failing_every(n: usize) -> Self {
        Self {
            fail_every: Some(n),
            ..Self::default()
        }
    }

    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Captioner for FakeCaptioner {
    fn name(&self) -> &str {
        "fake-captioner"
    }

    fn crop_size(&self) -> (u32, u32) {
        (16, 16)
    }

    async fn caption_batch(&self, crops: &[DynamicImage]) -> Result<Vec<Result<String>>> {
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(crops.len());
        }
        Ok(crops
            .iter()
            .map(|crop| {
                assert_eq!((crop.width(), crop.height()), (16, 16));
                let index = self.seen.fetch_add(1, Ordering::SeqCst);
                match self.fail_every {
                    Some(n) if index % n == 0 => Err(ScreenParseError::Caption {
                        message: format!("crop {index} rejected"),
                    }),
                    _ => Ok(format!("icon-{index}")),
                }
            })
            .collect())
    }
}

/// Captioners that break the batch contract.
pub enum BrokenCaptioner {
    /// Every batch fails as a whole.
    Fails,
    /// Every batch answers one caption short.
    Truncates,
}

#[async_trait]
impl Captioner for BrokenCaptioner {
    fn name(&self) -> &str {
        "broken-captioner"
    }

    fn crop_size(&self) -> (u32, u32) {
        (8, 8)
    }

    async fn caption_batch(&self, crops: &[DynamicImage]) -> Result<Vec<Result<String>>> {
        match self {
            BrokenCaptioner::Fails => Err(ScreenParseError::Caption {
                message: "model timed out".to_string(),
            }),
            BrokenCaptioner::Truncates => Ok(crops
                .iter()
                .skip(1)
                .map(|_| Ok("partial".to_string()))
                .collect()),
        }
    }
}
