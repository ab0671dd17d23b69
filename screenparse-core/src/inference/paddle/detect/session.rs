use glam::Vec2;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, imageops::FilterType};
use imageproc::{
    contours::{BorderType, find_contours},
    contrast::{ThresholdType, threshold},
    distance_transform::Norm,
    geometry::min_area_rect,
    morphology::dilate,
    point::Point,
};
use ndarray::prelude::*;
use ort::{
    session::{Session, builder::SessionBuilder},
    value::TensorRef,
};
use snafu::{OptionExt, ResultExt};

use crate::{
    analysis::bbox::Bbox,
    error::*,
    inference::model::{Model, OnnxSession, first_input_name, first_output_name},
};

use super::model::{PaddleDet, PaddleDetConfig};

pub struct PaddleDetSession<M: Model> {
    session: Session,
    model: M,
    input: String,
    output: String,
}

/// A detected text line in pixel coordinates of the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextRegion {
    pub bbox: Bbox,
    /// Mean text probability inside the region.
    pub score: f32,
}

/// Extra parameters for text detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetExtra {
    /// Original image dimensions
    pub original_shape: (u32, u32),
    /// Resized image dimensions inside the model input
    pub resized_shape: (u32, u32),
}

impl DetExtra {
    pub fn new(image: &DynamicImage, config: &PaddleDetConfig) -> Self {
        let (orig_w, orig_h) = (image.width().max(1), image.height().max(1));
        let scale = f32::min(
            config.required_width as f32 / orig_w as f32,
            config.required_height as f32 / orig_h as f32,
        );
        let new_w = ((orig_w as f32 * scale) as u32).clamp(1, config.required_width as u32);
        let new_h = ((orig_h as f32 * scale) as u32).clamp(1, config.required_height as u32);

        Self {
            original_shape: (orig_w, orig_h),
            resized_shape: (new_w, new_h),
        }
    }
}

impl PaddleDetSession<PaddleDet> {
    pub fn new(session: SessionBuilder, model: PaddleDet) -> Result<Self> {
        let session = session
            .commit_from_memory(&model.load()?)
            .context(OrtInitSnafu { stage: "det-commit" })?;

        let input = first_input_name(&session, PaddleDet::INPUT_NAME);
        let output = first_output_name(&session, PaddleDet::OUTPUT_NAME);

        Ok(Self {
            session,
            model,
            input,
            output,
        })
    }

    pub fn config(&self) -> &PaddleDetConfig {
        self.model.config()
    }

    /// Detect text lines in an entire image
    pub fn detect_text_lines(&mut self, image: &DynamicImage) -> Result<Vec<TextRegion>> {
        let extra = DetExtra::new(image, self.model.config());

        let input = self.preprocess(image)?;
        let (input_name, output_name) = (self.input.clone(), self.output.clone());
        let output = self.infer(input, &input_name, &output_name)?;

        self.postprocess(output, extra)
    }
}

impl OnnxSession<PaddleDet> for PaddleDetSession<PaddleDet> {
    type Output = Vec<TextRegion>;
    type Extra = DetExtra;

    fn preprocess(&self, image: &DynamicImage) -> Result<<PaddleDet as Model>::Input> {
        let config = self.model.config();
        let extra = DetExtra::new(image, config);
        let (new_w, new_h) = extra.resized_shape;

        let resized_img =
            image::imageops::resize(&image.to_rgb8(), new_w, new_h, FilterType::Triangle);

        let mut input_tensor = Array4::from_elem(
            [
                config.batch_size,
                config.input_channels,
                config.required_height,
                config.required_width,
            ],
            config.background_fill_value,
        );

        for (x, y, pixel) in resized_img.enumerate_pixels() {
            let x = x as usize;
            let y = y as usize;
            let [r, g, b] = pixel.0;

            // [0, 255] -> [-1, 1]
            input_tensor[[0, 0, y, x]] = (r as f32 / 255.0 - 0.5) / 0.5;
            input_tensor[[0, 1, y, x]] = (g as f32 / 255.0 - 0.5) / 0.5;
            input_tensor[[0, 2, y, x]] = (b as f32 / 255.0 - 0.5) / 0.5;
        }

        Ok(input_tensor)
    }

    fn postprocess(
        &self,
        output: <PaddleDet as Model>::Output,
        extra: Self::Extra,
    ) -> Result<Self::Output> {
        db_postprocess(&output, &extra, self.model.config())
    }

    fn infer(
        &mut self,
        input: <PaddleDet as Model>::Input,
        input_name: &str,
        output_name: &str,
    ) -> Result<<PaddleDet as Model>::Output> {
        let output = self
            .session
            .run(ort::inputs![
                input_name => TensorRef::from_array_view(&input).context(TensorSnafu{stage: "det-input"})?
            ])
            .context(InferenceSnafu {})?;

        let tensor = output
            .get(output_name)
            .context(NotFoundOutputSnafu { output_name })?
            .try_extract_array::<f32>()
            .context(TensorSnafu {
                stage: "det-extract",
            })?;

        // [1, 1, H, W] -> [1, H, W]
        let shape = tensor.shape().to_vec();
        let (h, w) = match shape.as_slice() {
            [.., h, w] => (*h, *w),
            _ => {
                return Err(ScreenParseError::Detection {
                    detector: PaddleDet::MODEL_NAME.to_string(),
                    message: format!("unexpected probability map shape {shape:?}"),
                });
            }
        };
        let output = tensor
            .to_shape([1, h, w])
            .context(ShapeSnafu { stage: "det-output" })?
            .to_owned();

        Ok(output)
    }
}

/// DB post-processing: binarize the probability map, find text kernels,
/// score them, expand them back to full text extent and scale to the source
/// image.
pub fn db_postprocess(
    pred: &Array3<f32>,
    extra: &DetExtra,
    config: &PaddleDetConfig,
) -> Result<Vec<TextRegion>> {
    let prob_map = pred.slice(ndarray::s![0, .., ..]);
    let (h, w) = prob_map.dim();

    let pred_data: Vec<f32> = prob_map.iter().copied().collect();
    let cbuf_data: Vec<u8> = pred_data
        .iter()
        .map(|&x| (x.clamp(0.0, 1.0) * 255.0) as u8)
        .collect();

    let shape_err = || ScreenParseError::Detection {
        detector: PaddleDet::MODEL_NAME.to_string(),
        message: format!("probability map of {w}x{h} does not fit its buffer"),
    };
    let pred_img: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_vec(w as u32, h as u32, pred_data).ok_or_else(shape_err)?;
    let cbuf_img = GrayImage::from_vec(w as u32, h as u32, cbuf_data).ok_or_else(shape_err)?;

    let threshold_img = threshold(
        &cbuf_img,
        (config.det_db_thresh * 255.0) as u8,
        ThresholdType::Binary,
    );
    let dilate_img = dilate(&threshold_img, Norm::LInf, 1);

    let contours = find_contours::<i32>(&dilate_img);

    let scale = Vec2::new(
        extra.original_shape.0 as f32 / extra.resized_shape.0 as f32,
        extra.original_shape.1 as f32 / extra.resized_shape.1 as f32,
    );

    let mut regions = Vec::new();
    for contour in contours
        .iter()
        .filter(|contour| matches!(contour.border_type, BorderType::Outer))
        .take(config.max_candidates)
    {
        if contour.points.len() <= 2 {
            continue;
        }

        let (mini_box, min_side) = get_mini_box(&contour.points);
        if min_side < config.min_side_thresh {
            continue;
        }

        let score = box_score(&mini_box, &pred_img);
        if score < config.det_db_box_thresh {
            continue;
        }

        let (expanded, expanded_min_side) = unclip(&mini_box, config.det_db_unclip_ratio);
        if expanded_min_side < config.min_side_thresh + 2.0 {
            continue;
        }

        let bbox = points_to_bbox(&expanded).clamp(Vec2::ZERO, Vec2::new(w as f32, h as f32));
        let bbox = Bbox::new(bbox.min * scale, bbox.max * scale);

        regions.push(TextRegion { bbox, score });
    }

    // top-to-bottom, left-to-right
    regions.sort_by(|a, b| {
        a.bbox
            .min
            .y
            .total_cmp(&b.bbox.min.y)
            .then_with(|| a.bbox.min.x.total_cmp(&b.bbox.min.x))
    });

    Ok(regions)
}

/// Minimum-area rectangle around the contour and its shorter side.
fn get_mini_box(points: &[Point<i32>]) -> ([Vec2; 4], f32) {
    let rect = min_area_rect(points);
    let corners = rect.map(|p| Vec2::new(p.x as f32, p.y as f32));

    let width = corners[0].distance(corners[1]);
    let height = corners[1].distance(corners[2]);

    (corners, width.min(height))
}

/// Mean probability inside the rectangle.
fn box_score(corners: &[Vec2; 4], prob_map: &ImageBuffer<Luma<f32>, Vec<f32>>) -> f32 {
    let bbox = points_to_bbox(corners);
    let (map_w, map_h) = (prob_map.width() as i32, prob_map.height() as i32);
    if map_w == 0 || map_h == 0 {
        return 0.0;
    }

    let xmin = (bbox.min.x.floor() as i32).clamp(0, map_w - 1);
    let xmax = (bbox.max.x.ceil() as i32).clamp(0, map_w - 1);
    let ymin = (bbox.min.y.floor() as i32).clamp(0, map_h - 1);
    let ymax = (bbox.max.y.ceil() as i32).clamp(0, map_h - 1);

    let roi_width = (xmax - xmin + 1) as u32;
    let roi_height = (ymax - ymin + 1) as u32;

    let mut polygon: Vec<Point<i32>> = corners
        .iter()
        .map(|p| Point::new(p.x.round() as i32 - xmin, p.y.round() as i32 - ymin))
        .collect();
    polygon.dedup();
    while polygon.len() > 1 && polygon.first() == polygon.last() {
        polygon.pop();
    }
    if polygon.len() < 3 {
        return 0.0;
    }

    let mut mask = GrayImage::new(roi_width, roi_height);
    imageproc::drawing::draw_polygon_mut(&mut mask, &polygon, Luma([255]));

    let mut sum = 0.0;
    let mut count = 0;
    for (x, y, pixel) in mask.enumerate_pixels() {
        if pixel[0] > 0 {
            sum += prob_map.get_pixel(x + xmin as u32, y + ymin as u32)[0];
            count += 1;
        }
    }

    if count == 0 { 0.0 } else { sum / count as f32 }
}

/// Grows the rectangle by `area * ratio / perimeter` on every side.
fn unclip(corners: &[Vec2; 4], unclip_ratio: f32) -> ([Vec2; 4], f32) {
    let side_u = corners[1] - corners[0];
    let side_v = corners[2] - corners[1];
    let (len_u, len_v) = (side_u.length(), side_v.length());

    let area = len_u * len_v;
    let perimeter = 2.0 * (len_u + len_v);
    if perimeter <= f32::EPSILON {
        return (*corners, 0.0);
    }
    let distance = area * unclip_ratio / perimeter;

    let center = (corners[0] + corners[2]) / 2.0;
    let axis_u = side_u.normalize_or_zero() * (len_u / 2.0 + distance);
    let axis_v = side_v.normalize_or_zero() * (len_v / 2.0 + distance);

    let expanded = [
        center - axis_u - axis_v,
        center + axis_u - axis_v,
        center + axis_u + axis_v,
        center - axis_u + axis_v,
    ];

    (expanded, (len_u + 2.0 * distance).min(len_v + 2.0 * distance))
}

fn points_to_bbox(points: &[Vec2]) -> Bbox {
    let (min, max) = points.iter().fold(
        (Vec2::splat(f32::MAX), Vec2::splat(f32::MIN)),
        |(min, max), p| (min.min(*p), max.max(*p)),
    );
    Bbox::new(min, max)
}
