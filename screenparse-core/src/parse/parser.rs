use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use image::DynamicImage;
use snafu::ResultExt;
use tracing::*;
use uuid::Uuid;

use crate::{
    analysis::reconcile::reconcile,
    error::{JoinSnafu, Result, ScreenParseError},
    inference::{
        caption::OpenAiCaptioner,
        detector::{Captioner, IconDetection, IconDetector, TextDetection, TextDetector},
        paddle::PaddleOcr,
        slot::ModelSlot,
        yolo::YoloIconDetector,
    },
    layout::{
        element::Element,
        result::{AnalysisResult, AnnotatedImage, ImageInfo},
    },
    parse::{
        caption::caption_icons,
        config::{ParseOptions, ParserConfig},
        fusion::{apply_captions, fuse},
        input::ImageInput,
        output::save_outputs,
        stage::{RunState, Stage},
    },
    render::Annotator,
};

/// Screenshot parsing pipeline.
///
/// Holds the model handles for the whole process lifetime; every handle is
/// loaded once, on first use or by [`ScreenParser::warm_up`]. One parser can
/// serve concurrent [`ScreenParser::parse`] calls.
pub struct ScreenParser {
    text: ModelSlot<dyn TextDetector>,
    icon: ModelSlot<dyn IconDetector>,
    captioner: Option<ModelSlot<dyn Captioner>>,
    annotator: Annotator,
    config: ParserConfig,
}

impl ScreenParser {
    /// Parser backed by PaddleOCR, the YOLO icon detector and, when
    /// configured, the OpenAI-compatible captioner. Models load lazily.
    #[tracing::instrument(skip_all)]
    pub fn new(config: ParserConfig) -> Result<Self> {
        let text_config = config.text.clone();
        let text = ModelSlot::lazy("paddle-ocr", move || {
            let detector: Arc<dyn TextDetector> = Arc::new(PaddleOcr::new(text_config.clone())?);
            Ok(detector)
        });

        let icon_config = config.icon.clone();
        let icon = ModelSlot::lazy("yolo-icon-detect", move || {
            let detector: Arc<dyn IconDetector> =
                Arc::new(YoloIconDetector::new(icon_config.clone())?);
            Ok(detector)
        });

        let captioner = config.caption.clone().map(|caption_config| {
            ModelSlot::lazy(caption_config.model.clone(), move || {
                let captioner: Arc<dyn Captioner> =
                    Arc::new(OpenAiCaptioner::new(caption_config.clone())?);
                Ok(captioner)
            })
        });

        Self::with_slots(text, icon, captioner, config)
    }

    /// Parser around already constructed backends.
    pub fn from_parts(
        text: Arc<dyn TextDetector>,
        icon: Arc<dyn IconDetector>,
        captioner: Option<Arc<dyn Captioner>>,
        config: ParserConfig,
    ) -> Result<Self> {
        let text = ModelSlot::ready(text.name().to_string(), text);
        let icon = ModelSlot::ready(icon.name().to_string(), icon);
        let captioner =
            captioner.map(|captioner| ModelSlot::ready(captioner.name().to_string(), captioner));
        Self::with_slots(text, icon, captioner, config)
    }

    pub fn with_slots(
        text: ModelSlot<dyn TextDetector>,
        icon: ModelSlot<dyn IconDetector>,
        captioner: Option<ModelSlot<dyn Captioner>>,
        config: ParserConfig,
    ) -> Result<Self> {
        let annotator = match &config.font_path {
            Some(path) => Annotator::with_font_file(path)?,
            None => Annotator::new()?,
        };

        Ok(Self {
            text,
            icon,
            captioner,
            annotator,
            config,
        })
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Loads every model handle now instead of on the first parse.
    /// Captioner failures are logged and left for the next attempt.
    #[tracing::instrument(skip_all)]
    pub async fn warm_up(&self) -> Result<()> {
        let (text, icon) = tokio::join!(self.text.get(), self.icon.get());
        text?;
        icon?;

        if let Some(captioner) = &self.captioner {
            if let Err(e) = captioner.get().await {
                warn!("captioner not ready, icons will use placeholders: {}", e);
            }
        }

        info!("All detectors ready.");
        Ok(())
    }

    /// Runs the whole pipeline on one image. Either every stage completes or
    /// a single error is returned; no partial result exists.
    pub async fn parse(&self, input: &ImageInput, options: &ParseOptions) -> Result<AnalysisResult> {
        let run_id = Uuid::new_v4();
        let analysis = self.run(run_id, input, options);

        let result = match self.config.timeout() {
            Some(budget) => match tokio::time::timeout(budget, analysis).await {
                Ok(result) => result,
                Err(_) => {
                    error!("Run {} exceeded its budget of {:?}", run_id, budget);
                    return Err(ScreenParseError::Timeout { budget });
                }
            },
            None => analysis.await,
        }?;

        if options.save_annotated {
            let stem = input
                .identifier()
                .and_then(|id| {
                    std::path::Path::new(&id)
                        .file_stem()
                        .map(|stem| stem.to_string_lossy().into_owned())
                })
                .unwrap_or_else(|| run_id.to_string());
            save_outputs(&result, &stem, &options.output_directory)?;
        }

        Ok(result)
    }

    #[tracing::instrument(skip_all, fields(run = %run_id))]
    async fn run(
        &self,
        run_id: Uuid,
        input: &ImageInput,
        options: &ParseOptions,
    ) -> Result<AnalysisResult> {
        info!("Starting screenshot analysis.");
        let mut state = RunState::new();

        let result = self.execute(run_id, &mut state, input, options).await;
        match &result {
            Ok(result) => info!(
                "Analysis finished with {} elements in {:?}",
                result.elements.len(),
                result.timings.total
            ),
            Err(e) => state.fail(e),
        }

        result
    }

    async fn execute(
        &self,
        run_id: Uuid,
        state: &mut RunState,
        input: &ImageInput,
        options: &ParseOptions,
    ) -> Result<AnalysisResult> {
        let image = Arc::new(input.decode()?);
        let image_info = ImageInfo {
            width: image.width(),
            height: image.height(),
        };
        debug!("decoded {}x{} input", image_info.width, image_info.height);

        // Stages 1 & 2: text and icon detection
        state.advance(Stage::DetectText);
        let (texts, text_elapsed, icons, icon_elapsed) = self
            .execute_detection_stages(&image, options.score_threshold)
            .await?;
        state.record(Stage::DetectText, text_elapsed);
        state.advance(Stage::DetectIcons);
        state.record(Stage::DetectIcons, icon_elapsed);

        // Stage 3: reconciliation
        state.advance(Stage::Reconcile);
        let start = Instant::now();
        let reconciled = reconcile(texts, icons, &self.config.reconcile);
        state.record(Stage::Reconcile, start.elapsed());
        info!(
            "Reconcile kept {} text and {} icon boxes in {:?}",
            reconciled.texts.len(),
            reconciled.icons.len(),
            start.elapsed()
        );

        // Stage 4: fusion
        state.advance(Stage::Fuse);
        let start = Instant::now();
        let fused = fuse(reconciled, self.config.reconcile.line_tolerance);
        state.record(Stage::Fuse, start.elapsed());
        debug!("fused {} elements", fused.elements.len());

        // Stages 5 & 6: captions and annotation only share the fused boxes
        state.advance(Stage::Caption);
        let annotate = options.annotate || options.save_annotated;
        let (captions, annotated) = tokio::join!(
            self.execute_caption_stage(&image, &fused.elements),
            self.execute_annotate_stage(&image, &fused.elements, annotate),
        );
        let (captions, caption_elapsed) = captions;
        state.record(Stage::Caption, caption_elapsed);

        state.advance(Stage::Annotate);
        let (annotated_image, annotate_elapsed) = annotated?;
        state.record(Stage::Annotate, annotate_elapsed);

        let mut elements = fused.elements;
        apply_captions(&mut elements, captions);

        Ok(AnalysisResult {
            run_id,
            annotated_image,
            coordinate_map: fused.coordinate_map,
            elements,
            timings: state.finish(),
            image_info,
        })
    }

    /// Runs both detectors on the blocking pool at the same time.
    ///
    /// A failed text pass degrades to no text; a failed icon pass fails the
    /// run.
    #[tracing::instrument(skip_all)]
    async fn execute_detection_stages(
        &self,
        image: &Arc<DynamicImage>,
        score_threshold: f32,
    ) -> Result<(Vec<TextDetection>, Duration, Vec<IconDetection>, Duration)> {
        let (text_detector, icon_detector) = tokio::join!(self.text.get(), self.icon.get());
        let icon_detector = icon_detector?;
        let text_detector = text_detector?;

        info!(
            "Executing detection with `{}` and `{}`",
            text_detector.name(),
            icon_detector.name()
        );

        let text_task = tokio::task::spawn_blocking({
            let image = Arc::clone(image);
            let detector = Arc::clone(&text_detector);
            move || {
                let start = Instant::now();
                (detector.detect(&image), start.elapsed())
            }
        });
        let icon_task = tokio::task::spawn_blocking({
            let image = Arc::clone(image);
            let detector = Arc::clone(&icon_detector);
            move || {
                let start = Instant::now();
                (detector.detect(&image, score_threshold), start.elapsed())
            }
        });

        let (text_joined, icon_joined) = tokio::join!(text_task, icon_task);

        let (icons, icon_elapsed) = icon_joined.context(JoinSnafu {
            stage: "detect-icons",
        })?;
        let icons = icons.map_err(|e| ScreenParseError::detection(icon_detector.name(), e))?;
        info!(
            "Icon detection found {} boxes in {:?}",
            icons.len(),
            icon_elapsed
        );

        let (texts, text_elapsed) = match text_joined {
            Ok((Ok(texts), elapsed)) => {
                info!("Text detection found {} lines in {:?}", texts.len(), elapsed);
                (texts, elapsed)
            }
            Ok((Err(e), elapsed)) => {
                let e = ScreenParseError::detection(text_detector.name(), e);
                warn!("Text detection failed after {:?}, continuing without text: {}", elapsed, e);
                (Vec::new(), elapsed)
            }
            Err(e) => {
                warn!("Text detection worker died, continuing without text: {}", e);
                (Vec::new(), Duration::ZERO)
            }
        };

        Ok((texts, text_elapsed, icons, icon_elapsed))
    }

    async fn execute_caption_stage(
        &self,
        image: &Arc<DynamicImage>,
        elements: &[Element],
    ) -> (Vec<String>, Duration) {
        let start = Instant::now();

        let captioner = match &self.captioner {
            Some(slot) if elements.iter().any(|element| element.is_icon()) => {
                match slot.get().await {
                    Ok(captioner) => Some(captioner),
                    Err(e) => {
                        warn!("Captioner unavailable, icons keep the placeholder: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        let captions = caption_icons(
            captioner.as_deref(),
            image,
            elements,
            self.config.caption_batch_size,
            &self.config.caption_placeholder,
        )
        .await;

        (captions, start.elapsed())
    }

    async fn execute_annotate_stage(
        &self,
        image: &Arc<DynamicImage>,
        elements: &[Element],
        annotate: bool,
    ) -> Result<(Option<AnnotatedImage>, Duration)> {
        if !annotate {
            debug!("annotation skipped");
            return Ok((None, Duration::ZERO));
        }

        let start = Instant::now();
        let annotator = self.annotator.clone();
        let image = Arc::clone(image);
        let elements = elements.to_vec();

        let annotated = tokio::task::spawn_blocking(move || annotator.annotate(&image, &elements))
            .await
            .context(JoinSnafu { stage: "annotate" })??;

        info!("Annotation completed in {:?}", start.elapsed());
        Ok((Some(annotated), start.elapsed()))
    }
}

impl std::fmt::Debug for ScreenParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenParser")
            .field("text", &self.text)
            .field("icon", &self.icon)
            .field("captioner", &self.captioner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::{
        error::ErrorKind,
        layout::element::ElementKind,
        parse::fixtures::{FakeCaptioner, FakeIcons, FakeText, icon, text},
    };

    fn blank() -> ImageInput {
        ImageInput::Image(DynamicImage::new_rgb8(320, 200))
    }

    fn parser(
        texts: FakeText,
        icons: FakeIcons,
        captioner: Option<Arc<dyn Captioner>>,
    ) -> ScreenParser {
        ScreenParser::from_parts(
            Arc::new(texts),
            Arc::new(icons),
            captioner,
            ParserConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_no_detections() {
        let parser = parser(FakeText::new(vec![]), FakeIcons::new(vec![]), None);
        let result = parser.parse(&blank(), &ParseOptions::default()).await.unwrap();
        assert!(result.elements.is_empty());
        assert!(result.coordinate_map.is_empty());
        assert_eq!(result.image_info.width, 320);
        assert!(result.annotated_image.is_some());
    }

    #[tokio::test]
    async fn test_save_button_and_document_label() {
        let parser = parser(
            FakeText::new(vec![text([0.1, 0.6, 0.4, 0.66], "Document 1", 0.92)]),
            FakeIcons::new(vec![icon([0.05, 0.05, 0.12, 0.15], 0.81)]),
            Some(Arc::new(FakeCaptioner::default())),
        );
        let result = parser.parse(&blank(), &ParseOptions::default()).await.unwrap();

        assert_eq!(result.elements.len(), 2);
        let icon = &result.elements[0];
        assert_eq!(icon.kind, ElementKind::Icon);
        assert!(icon.interactive);
        assert_eq!(icon.content, "icon-0");

        let label = &result.elements[1];
        assert_eq!(label.kind, ElementKind::Text);
        assert!(!label.interactive);
        assert_eq!(label.content, "Document 1");
        assert_eq!(result.find_by_description("document").map(|e| e.id), Some(1));
    }

    #[tokio::test]
    async fn test_ids_and_coordinate_map_agree() {
        let parser = parser(
            FakeText::new(vec![
                text([0.1, 0.1, 0.3, 0.15], "File", 0.9),
                text([0.35, 0.1, 0.5, 0.15], "Edit", 0.9),
                text([0.1, 0.8, 0.5, 0.85], "Ready", 0.6),
            ]),
            FakeIcons::new(vec![
                icon([0.8, 0.1, 0.85, 0.15], 0.7),
                icon([0.9, 0.1, 0.95, 0.15], 0.02),
                icon([0.5, 0.5, 0.55, 0.55], 0.3),
            ]),
            None,
        );
        let result = parser.parse(&blank(), &ParseOptions::default()).await.unwrap();

        // 0.02 is below the default threshold
        assert_eq!(result.elements.len(), 5);
        let ids: Vec<_> = result.elements.iter().map(|e| e.id).collect();
        assert_eq!(ids, (0..5).collect::<Vec<_>>());

        let keys: BTreeSet<_> = result.coordinate_map.keys().cloned().collect();
        let expected: BTreeSet<_> = ids.iter().map(|id| id.to_string()).collect();
        assert_eq!(keys, expected);

        for element in result.icon_elements() {
            assert_eq!(element.content, "unknown");
        }
    }

    #[tokio::test]
    async fn test_duplicate_icons_keep_higher_score() {
        let parser = parser(
            FakeText::new(vec![]),
            FakeIcons::new(vec![
                icon([0.1, 0.1, 0.2, 0.2], 0.3),
                // IoU with the first box is 0.9
                icon([0.1, 0.1, 0.2, 0.19], 0.6),
            ]),
            None,
        );
        let result = parser.parse(&blank(), &ParseOptions::default()).await.unwrap();
        assert_eq!(result.elements.len(), 1);
        let [_, _, _, h] = result.coordinate_map["0"];
        assert!((h - 0.09).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_ocr_failure_degrades_to_icons_only() {
        let parser = parser(
            FakeText::failing(),
            FakeIcons::new(vec![
                icon([0.1, 0.1, 0.2, 0.2], 0.5),
                icon([0.6, 0.1, 0.7, 0.2], 0.5),
            ]),
            None,
        );
        let result = parser.parse(&blank(), &ParseOptions::default()).await.unwrap();
        assert_eq!(result.elements.len(), 2);
        assert!(result.elements.iter().all(|e| e.kind == ElementKind::Icon));
    }

    #[tokio::test]
    async fn test_unavailable_icon_detector_fails_run() {
        let text_slot: ModelSlot<dyn TextDetector> = ModelSlot::ready(
            "fake-ocr",
            Arc::new(FakeText::new(vec![text([0.1, 0.1, 0.2, 0.2], "a", 0.9)])),
        );
        let icon_slot: ModelSlot<dyn IconDetector> = ModelSlot::lazy("missing-icons", || {
            Err(ScreenParseError::unavailable("missing-icons", "weights not found"))
        });
        let parser =
            ScreenParser::with_slots(text_slot, icon_slot, None, ParserConfig::default()).unwrap();

        let err = parser
            .parse(&blank(), &ParseOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DetectorUnavailable);
        assert!(parser.warm_up().await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let parser = parser(FakeText::new(vec![]), FakeIcons::new(vec![]), None);
        let err = parser
            .parse(&ImageInput::base64("%%%"), &ParseOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_timeout() {
        let config = ParserConfig {
            timeout_ms: Some(20),
            ..ParserConfig::default()
        };
        let parser = ScreenParser::from_parts(
            Arc::new(FakeText::new(vec![])),
            Arc::new(FakeIcons::slow(vec![], Duration::from_millis(300))),
            None,
            config,
        )
        .unwrap();

        let err = parser
            .parse(&blank(), &ParseOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_annotation_skippable() {
        let parser = parser(
            FakeText::new(vec![]),
            FakeIcons::new(vec![icon([0.1, 0.1, 0.2, 0.2], 0.5)]),
            None,
        );
        let options = ParseOptions::builder().annotate(false).build().unwrap();
        let result = parser.parse(&blank(), &options).await.unwrap();
        assert!(result.annotated_image.is_none());
        assert_eq!(result.elements.len(), 1);
        assert_eq!(result.timings.annotate, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_score_threshold_is_forwarded() {
        let parser = parser(
            FakeText::new(vec![]),
            FakeIcons::new(vec![
                icon([0.1, 0.1, 0.2, 0.2], 0.3),
                icon([0.5, 0.5, 0.6, 0.6], 0.6),
            ]),
            None,
        );
        let options = ParseOptions::builder().score_threshold(0.5).build().unwrap();
        let result = parser.parse(&blank(), &options).await.unwrap();
        assert_eq!(result.elements.len(), 1);
    }
}
