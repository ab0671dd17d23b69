use std::sync::Mutex;

use glam::Vec2;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::*;

use crate::{
    analysis::bbox::Bbox,
    consts::TEXT_MIN_CONFIDENCE,
    error::{Result, ScreenParseError},
    inference::{
        detector::{TextDetection, TextDetector},
        model::session_builder,
        paddle::{
            detect::{PaddleDet, PaddleDetConfig, PaddleDetSession, TextRegion},
            recognize::{PaddleRec, PaddleRecConfig, PaddleRecSession, Recognition},
        },
    },
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaddleOcrConfig {
    pub det: PaddleDetConfig,
    pub rec: PaddleRecConfig,
    /// Detections whose combined confidence falls below this are dropped.
    pub min_confidence: f32,
    pub intra_threads: usize,
}

impl Default for PaddleOcrConfig {
    fn default() -> Self {
        Self {
            det: PaddleDetConfig::default(),
            rec: PaddleRecConfig::default(),
            min_confidence: TEXT_MIN_CONFIDENCE,
            intra_threads: 4,
        }
    }
}

/// [`TextDetector`] running PaddleOCR detection followed by recognition of
/// every detected line.
pub struct PaddleOcr {
    detect: Mutex<PaddleDetSession<PaddleDet>>,
    recognizer: Mutex<PaddleRecSession<PaddleRec>>,
    min_confidence: f32,
    text_padding: f32,
}

impl PaddleOcr {
    const NAME: &'static str = "paddle-ocr";

    #[tracing::instrument(skip_all)]
    pub fn new(config: PaddleOcrConfig) -> Result<Self> {
        info!("Initializing text detection and recognition sessions.");
        let text_padding = config.det.text_padding;
        let detect = PaddleDetSession::new(
            session_builder(config.intra_threads)?,
            PaddleDet::new(config.det),
        )?;
        let recognizer = PaddleRecSession::new(
            session_builder(config.intra_threads)?,
            PaddleRec::new(config.rec),
        )?;
        debug!(
            "recognition dictionary holds {} entries",
            recognizer.character_dict().len()
        );

        Ok(Self {
            detect: Mutex::new(detect),
            recognizer: Mutex::new(recognizer),
            min_confidence: config.min_confidence,
            text_padding,
        })
    }
}

fn poisoned(stage: &str) -> ScreenParseError {
    ScreenParseError::Poisoned {
        stage: stage.to_string(),
    }
}

/// Combines a detected line with its recognition, dropping empty or weak
/// results. The returned box is in the unit square.
fn to_text_detection(
    region: &TextRegion,
    recognition: Recognition,
    image_size: (u32, u32),
    min_confidence: f32,
) -> Option<TextDetection> {
    let confidence = region.score * recognition.confidence;
    if recognition.text.is_empty() || confidence < min_confidence {
        return None;
    }

    Some(TextDetection::new(
        region.bbox.normalize(image_size.0, image_size.1),
        recognition.text,
        confidence,
    ))
}

/// Recognizes every region in order. A line whose recognition fails is
/// skipped; the remaining lines are kept.
fn recognize_lines<F>(
    regions: &[TextRegion],
    image_size: (u32, u32),
    min_confidence: f32,
    mut recognize: F,
) -> Vec<TextDetection>
where
    F: FnMut(&TextRegion) -> Result<Recognition>,
{
    let mut detections = Vec::with_capacity(regions.len());
    for (index, region) in regions.iter().enumerate() {
        let recognition = match recognize(region) {
            Ok(recognition) => recognition,
            Err(e) => {
                debug!("skipping text line {}: {}", index, e);
                continue;
            }
        };

        if let Some(detection) = to_text_detection(region, recognition, image_size, min_confidence)
        {
            detections.push(detection);
        }
    }
    detections
}

impl TextDetector for PaddleOcr {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn detect(&self, image: &DynamicImage) -> Result<Vec<TextDetection>> {
        let regions = self
            .detect
            .lock()
            .map_err(|_| poisoned("paddle-det"))?
            .detect_text_lines(image)?;
        debug!("text detector found {} lines", regions.len());

        let mut recognizer = self.recognizer.lock().map_err(|_| poisoned("paddle-rec"))?;

        let padding = Vec2::splat(self.text_padding);
        let detections = recognize_lines(
            &regions,
            (image.width(), image.height()),
            self.min_confidence,
            |region| {
                let padded = Bbox::new(region.bbox.min - padding, region.bbox.max + padding);
                recognizer.recognize_text_region(image, &padded)
            },
        );

        debug!(
            "text detector kept {} of {} lines",
            detections.len(),
            regions.len()
        );

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(score: f32) -> TextRegion {
        TextRegion {
            bbox: Bbox::new(Vec2::new(100.0, 50.0), Vec2::new(300.0, 100.0)),
            score,
        }
    }

    fn recognition(text: &str, confidence: f32) -> Recognition {
        Recognition {
            text: text.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_confidence_is_product() {
        let detection =
            to_text_detection(&region(0.8), recognition("Document 1", 0.5), (400, 200), 0.1)
                .unwrap();
        assert!((detection.confidence - 0.4).abs() < 1e-6);
        assert_eq!(detection.text, "Document 1");
        assert_eq!(detection.bbox.xyxy(), [0.25, 0.25, 0.75, 0.5]);
        assert_eq!(detection.interactive, None);
    }

    #[test]
    fn test_filters_weak_and_empty() {
        assert!(to_text_detection(&region(0.2), recognition("ok", 0.3), (400, 200), 0.1).is_none());
        assert!(to_text_detection(&region(0.9), recognition("", 0.9), (400, 200), 0.1).is_none());
    }

    #[test]
    fn test_failed_line_is_skipped() {
        let regions = vec![region(0.9), region(0.8), region(0.7)];
        let mut calls = 0;
        let detections = recognize_lines(&regions, (400, 200), 0.1, |region| {
            calls += 1;
            if region.score == 0.8 {
                return Err(poisoned("paddle-rec"));
            }
            Ok(recognition(&format!("line {}", region.score), 0.9))
        });

        assert_eq!(calls, 3);
        let texts: Vec<_> = detections.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["line 0.9", "line 0.7"]);
    }

    #[test]
    fn test_default_config() {
        let config = PaddleOcrConfig::default();
        assert_eq!(config.min_confidence, TEXT_MIN_CONFIDENCE);
        assert_eq!(config.det.det_db_unclip_ratio, 1.5);
    }
}
