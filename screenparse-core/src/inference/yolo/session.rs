use std::sync::Mutex;

use glam::Vec2;
use image::{DynamicImage, GenericImageView, imageops::FilterType};
use ndarray::prelude::*;
use ort::{
    session::{Session, builder::SessionBuilder},
    value::TensorRef,
};
use snafu::{OptionExt, ResultExt};
use tracing::*;

use crate::{
    analysis::bbox::Bbox,
    error::*,
    inference::{
        detector::{IconDetection, IconDetector},
        model::{Model, OnnxSession, first_input_name, first_output_name, session_builder},
        yolo::model::{Yolo, YoloConfig},
    },
};

pub struct YoloSession<M: Model> {
    session: Session,
    model: M,
    input: String,
    output: String,
}

/// Per-call geometry needed to map predictions back onto the screenshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageMeta {
    pub image_size: Vec2,
    /// Factor the screenshot was resized by to fit the model input.
    pub scale: f32,
    pub score_threshold: f32,
}

impl ImageMeta {
    pub fn new(image: &DynamicImage, config: &YoloConfig, score_threshold: f32) -> Self {
        let (w0, h0) = image.dimensions();
        let (scale, _, _) = scale_wh(
            w0 as f32,
            h0 as f32,
            config.required_width as f32,
            config.required_height as f32,
        );
        Self {
            image_size: Vec2::new(w0 as f32, h0 as f32),
            scale,
            score_threshold,
        }
    }
}

/// Calculates the scaling that fits an image within the target dimensions
/// while keeping its aspect ratio.
fn scale_wh(w0: f32, h0: f32, target_w: f32, target_h: f32) -> (f32, f32, f32) {
    let scale = f32::min(target_w / w0.max(1.0), target_h / h0.max(1.0));
    let w_new = (w0 * scale).round().max(1.0);
    let h_new = (h0 * scale).round().max(1.0);
    (scale, w_new, h_new)
}

impl YoloSession<Yolo> {
    pub fn new(session: SessionBuilder, model: Yolo) -> Result<Self> {
        let session = session
            .commit_from_memory(&model.load()?)
            .context(OrtInitSnafu { stage: "commit" })?;

        let input = first_input_name(&session, Yolo::INPUT_NAME);
        let output = first_output_name(&session, Yolo::OUTPUT_NAME);

        Ok(Self {
            session,
            model,
            input,
            output,
        })
    }

    pub fn detect(
        &mut self,
        image: &DynamicImage,
        score_threshold: f32,
    ) -> Result<Vec<IconDetection>> {
        let meta = ImageMeta::new(image, self.model.config(), score_threshold);

        let input = self.preprocess(image)?;
        let (input_name, output_name) = (self.input.clone(), self.output.clone());
        let output = self.infer(input, &input_name, &output_name)?;

        self.postprocess(output, meta)
    }
}

impl OnnxSession<Yolo> for YoloSession<Yolo> {
    type Output = Vec<IconDetection>;
    type Extra = ImageMeta;

    fn preprocess(&self, image: &DynamicImage) -> Result<<Yolo as Model>::Input> {
        Ok(build_input_tensor(image, self.model.config()))
    }

    fn postprocess(
        &self,
        output: <Yolo as Model>::Output,
        extra: Self::Extra,
    ) -> Result<Self::Output> {
        decode_predictions(output.view(), self.model.config().cxywh_size, &extra)
    }

    fn infer(
        &mut self,
        input: <Yolo as Model>::Input,
        input_name: &str,
        output_name: &str,
    ) -> Result<<Yolo as Model>::Output> {
        let output = self
            .session
            .run(ort::inputs![
                input_name => TensorRef::from_array_view(&input).context(TensorSnafu{stage: "input"})?
            ])
            .context(InferenceSnafu {})?;

        let tensor = output
            .get(output_name)
            .context(NotFoundOutputSnafu { output_name })?
            .try_extract_array::<f32>()
            .context(TensorSnafu { stage: "extract" })?;

        // [batch, 4 + classes, proposals]
        let output = tensor
            .into_dimensionality::<Ix3>()
            .context(ShapeSnafu { stage: "output" })?
            .to_owned();

        Ok(output)
    }
}

/// Resizes the screenshot into the top-left corner of the model input and
/// fills the rest with the background value. Pixels are scaled to `0..=1`.
pub fn build_input_tensor(image: &DynamicImage, config: &YoloConfig) -> Array4<f32> {
    let (w0, h0) = image.dimensions();
    let (_, w_new, h_new) = scale_wh(
        w0 as f32,
        h0 as f32,
        config.required_width as f32,
        config.required_height as f32,
    );

    let resized = image
        .resize_exact(w_new as u32, h_new as u32, FilterType::Triangle)
        .to_rgb8();

    let mut input_tensor = Array4::from_elem(
        [
            config.batch_size,
            config.input_channels,
            config.required_height,
            config.required_width,
        ],
        config.background_fill_value,
    );

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        if x >= config.required_width || y >= config.required_height {
            continue;
        }
        let [r, g, b] = pixel.0;
        input_tensor[[0, 0, y, x]] = r as f32 / 255.0;
        input_tensor[[0, 1, y, x]] = g as f32 / 255.0;
        input_tensor[[0, 2, y, x]] = b as f32 / 255.0;
    }

    input_tensor
}

/// Decodes a `[1, 4 + C, N]` prediction tensor into unit-square boxes.
///
/// The score of a proposal is its best class probability; class identity is
/// discarded. Proposals under `meta.score_threshold` are dropped. No
/// suppression happens here.
pub fn decode_predictions(
    output: ArrayView3<'_, f32>,
    cxywh_size: usize,
    meta: &ImageMeta,
) -> Result<Vec<IconDetection>> {
    let (_, rows, _) = output.dim();
    if rows <= cxywh_size {
        return Err(ScreenParseError::Detection {
            detector: Yolo::MODEL_NAME.to_string(),
            message: format!("prediction has {rows} rows, expected more than {cxywh_size}"),
        });
    }

    let predictions: ArrayView2<'_, f32> = output.slice(ndarray::s![0, .., ..]);
    let mut detections = Vec::new();

    for prediction in predictions.axis_iter(Axis(1)) {
        let score = prediction
            .slice(ndarray::s![cxywh_size..])
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);

        if !score.is_finite() || score < meta.score_threshold {
            continue;
        }

        let center = Vec2::new(prediction[0], prediction[1]);
        let size = Vec2::new(prediction[2], prediction[3]);

        // model input space -> screenshot pixels -> unit square
        let bbox = Bbox::from_center_size(center, size).scale(1.0 / meta.scale);
        let bbox = Bbox::new(bbox.min / meta.image_size, bbox.max / meta.image_size);

        detections.push(IconDetection::new(bbox, score));
    }

    Ok(detections)
}

/// [`IconDetector`] backed by a YOLO-family ONNX model.
pub struct YoloIconDetector {
    session: Mutex<YoloSession<Yolo>>,
}

impl YoloIconDetector {
    #[tracing::instrument(skip_all)]
    pub fn new(config: YoloConfig) -> Result<Self> {
        info!("Initializing icon detection session from {:?}", config.model_path);
        let builder = session_builder(config.intra_threads)?;
        let session = YoloSession::new(builder, Yolo::new(config))?;

        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl IconDetector for YoloIconDetector {
    fn name(&self) -> &str {
        Yolo::MODEL_NAME
    }

    fn detect(&self, image: &DynamicImage, score_threshold: f32) -> Result<Vec<IconDetection>> {
        let mut session = self.session.lock().map_err(|_| ScreenParseError::Poisoned {
            stage: Yolo::MODEL_NAME.to_string(),
        })?;

        let detections = session.detect(image, score_threshold)?;
        debug!("icon detector produced {} boxes", detections.len());

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::CXYWH_OFFSET;

    fn meta(w: f32, h: f32, score_threshold: f32) -> ImageMeta {
        ImageMeta {
            image_size: Vec2::new(w, h),
            scale: 640.0 / w.max(h),
            score_threshold,
        }
    }

    #[test]
    fn test_scale_wh_keeps_aspect() {
        let (scale, w, h) = scale_wh(1280.0, 640.0, 640.0, 640.0);
        assert_eq!(scale, 0.5);
        assert_eq!((w, h), (640.0, 320.0));
    }

    #[test]
    fn test_input_tensor_padding() {
        let image = DynamicImage::new_rgb8(200, 100);
        let tensor = build_input_tensor(&image, &YoloConfig::default());
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        // black screenshot in the top half, fill below it
        assert_eq!(tensor[[0, 0, 10, 10]], 0.0);
        assert_eq!(tensor[[0, 0, 600, 10]], YoloConfig::default().background_fill_value);
    }

    #[test]
    fn test_decode_predictions() {
        // two proposals, two classes
        let mut output = Array3::<f32>::zeros((1, CXYWH_OFFSET + 2, 2));
        // proposal 0: centered at (320, 160) in a 640-wide input, 64x32
        output[[0, 0, 0]] = 320.0;
        output[[0, 1, 0]] = 160.0;
        output[[0, 2, 0]] = 64.0;
        output[[0, 3, 0]] = 32.0;
        output[[0, 4, 0]] = 0.1;
        output[[0, 5, 0]] = 0.8;
        // proposal 1: below threshold
        output[[0, 0, 1]] = 100.0;
        output[[0, 1, 1]] = 100.0;
        output[[0, 2, 1]] = 10.0;
        output[[0, 3, 1]] = 10.0;
        output[[0, 4, 1]] = 0.01;

        let detections =
            decode_predictions(output.view(), CXYWH_OFFSET, &meta(1280.0, 640.0, 0.05)).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].score, 0.8);

        let [x1, y1, x2, y2] = detections[0].bbox.xyxy();
        assert!((x1 - 0.45).abs() < 1e-6);
        assert!((y1 - 0.45).abs() < 1e-6);
        assert!((x2 - 0.55).abs() < 1e-6);
        assert!((y2 - 0.55).abs() < 1e-6);
    }

    #[test]
    fn test_decode_rejects_classless_output() {
        let output = Array3::<f32>::zeros((1, CXYWH_OFFSET, 3));
        let err = decode_predictions(output.view(), CXYWH_OFFSET, &meta(640.0, 640.0, 0.05))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DetectionError);
    }
}
