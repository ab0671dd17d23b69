use image::{DynamicImage, imageops::FilterType};
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
    inference::model::{Model, OnnxSession, first_input_name, first_output_name},
};

use super::model::PaddleRec;

pub struct PaddleRecSession<M: Model> {
    session: Session,
    model: M,
    input: String,
    output: String,
    character_dict: Vec<String>,
}

/// Recognized string with the mean probability of its characters.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub confidence: f32,
}

impl PaddleRecSession<PaddleRec> {
    pub fn new(session: SessionBuilder, model: PaddleRec) -> Result<Self> {
        let session = session
            .commit_from_memory(&model.load()?)
            .context(OrtInitSnafu { stage: "rec-commit" })?;

        let chars = match &model.config().dict_path {
            Some(path) => std::fs::read_to_string(path).context(IoReadSnafu {
                path: path.to_string_lossy(),
            })?,
            // Extract character dictionary from model metadata
            None => session
                .metadata()
                .ok()
                .and_then(|m| m.custom("character").ok().flatten())
                .unwrap_or_default(),
        };

        let character_dict = build_character_dict(&chars);
        if character_dict.len() <= 2 {
            warn!("Recognition model ships an empty character dictionary");
        }

        let input = first_input_name(&session, PaddleRec::INPUT_NAME);
        let output = first_output_name(&session, PaddleRec::OUTPUT_NAME);

        Ok(Self {
            session,
            model,
            input,
            output,
            character_dict,
        })
    }

    pub fn character_dict(&self) -> &[String] {
        &self.character_dict
    }

    /// Recognizes the text inside `bbox` (pixel coordinates).
    pub fn recognize_text_region(
        &mut self,
        image: &DynamicImage,
        bbox: &Bbox,
    ) -> Result<Recognition> {
        let cropped_image = crop_image_region(image, bbox);

        let input = self.preprocess(&cropped_image)?;
        let (input_name, output_name) = (self.input.clone(), self.output.clone());
        let output = self.infer(input, &input_name, &output_name)?;

        self.postprocess(output, ())
    }
}

/// Blank token first, dictionary entries, then the space token.
fn build_character_dict(chars: &str) -> Vec<String> {
    let mut character_dict = Vec::with_capacity(chars.len() + 2);
    character_dict.push("#".to_string());
    character_dict.extend(
        chars
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(str::to_string),
    );
    character_dict.push(" ".to_string());
    character_dict
}

/// Crop image to a bounding box region, clamped to the image.
pub fn crop_image_region(image: &DynamicImage, bbox: &Bbox) -> DynamicImage {
    let clamped_bbox = bbox.clamp(
        glam::Vec2::ZERO,
        glam::Vec2::new(image.width() as f32, image.height() as f32),
    );

    let x = clamped_bbox.min.x as u32;
    let y = clamped_bbox.min.y as u32;
    let width = (clamped_bbox.width().max(1.0) as u32).min(image.width().saturating_sub(x));
    let height = (clamped_bbox.height().max(1.0) as u32).min(image.height().saturating_sub(y));

    if width == 0 || height == 0 {
        return DynamicImage::new_rgb8(1, 1);
    }

    image.crop_imm(x, y, width, height)
}

/// Greedy CTC decoding over `[time, vocab]` probabilities. Index 0 is the
/// blank token; repeated indices collapse.
pub fn ctc_decode(probs: ArrayView2<'_, f32>, character_dict: &[String]) -> Recognition {
    let mut text = String::new();
    let mut char_probs = Vec::new();
    let mut prev_idx = None;

    for timestep in probs.axis_iter(Axis(0)) {
        let (max_idx, max_prob) = timestep
            .iter()
            .copied()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .unwrap_or((0, 0.0));

        if max_idx != 0 && Some(max_idx) != prev_idx {
            if let Some(ch) = character_dict.get(max_idx) {
                text.push_str(ch);
                char_probs.push(max_prob);
            }
        }

        prev_idx = Some(max_idx);
    }

    let confidence = if char_probs.is_empty() {
        0.0
    } else {
        char_probs.iter().sum::<f32>() / char_probs.len() as f32
    };

    Recognition {
        text: text.trim().to_string(),
        confidence,
    }
}

impl OnnxSession<PaddleRec> for PaddleRecSession<PaddleRec> {
    type Output = Recognition;
    type Extra = ();

    fn preprocess(&self, image: &DynamicImage) -> Result<<PaddleRec as Model>::Input> {
        let config = self.model.config();
        let img_src = image.to_rgb8();

        let scale = config.required_height as f32 / img_src.height().max(1) as f32;
        let dst_width = ((img_src.width() as f32 * scale) as u32).clamp(1, config.max_width as u32);

        let src_resize = image::imageops::resize(
            &img_src,
            dst_width,
            config.required_height as u32,
            FilterType::Triangle,
        );

        // [batch_size, channels, height, width]
        let mut input_tensor = Array4::zeros([
            config.batch_size,
            config.input_channels,
            src_resize.height() as _,
            src_resize.width() as _,
        ]);

        for (x, y, pixel) in src_resize.enumerate_pixels() {
            let x = x as usize;
            let y = y as usize;
            let [r, g, b] = pixel.0;

            input_tensor[[0, 0, y, x]] = (r as f32 / 255.0 - 0.5) / 0.5;
            input_tensor[[0, 1, y, x]] = (g as f32 / 255.0 - 0.5) / 0.5;
            input_tensor[[0, 2, y, x]] = (b as f32 / 255.0 - 0.5) / 0.5;
        }

        Ok(input_tensor)
    }

    fn postprocess(
        &self,
        output: <PaddleRec as Model>::Output,
        _extra: Self::Extra,
    ) -> Result<Self::Output> {
        // [batch_size, sequence_length, vocab_size], first batch only
        Ok(ctc_decode(
            output.slice(ndarray::s![0, .., ..]),
            &self.character_dict,
        ))
    }

    fn infer(
        &mut self,
        input: <PaddleRec as Model>::Input,
        input_name: &str,
        output_name: &str,
    ) -> Result<<PaddleRec as Model>::Output> {
        let output = self
            .session
            .run(ort::inputs![
                input_name => TensorRef::from_array_view(&input).context(TensorSnafu{stage: "rec-input"})?
            ])
            .context(InferenceSnafu {})?;

        let tensor = output
            .get(output_name)
            .context(NotFoundOutputSnafu { output_name })?
            .try_extract_array::<f32>()
            .context(TensorSnafu {
                stage: "rec-extract",
            })?;

        let output_array = tensor
            .into_dimensionality::<Ix3>()
            .context(ShapeSnafu { stage: "rec-output" })?
            .to_owned();

        Ok(output_array)
    }
}
