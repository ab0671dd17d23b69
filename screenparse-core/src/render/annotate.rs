use std::{io::Cursor, path::Path};

use ab_glyph::{FontArc, PxScale};
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use snafu::ResultExt;
use tracing::*;

use crate::{
    consts::{ANNOTATION_REFERENCE_SIZE, FONT, ICON_COLOR, TEXT_COLOR},
    error::*,
    layout::{
        element::{Element, ElementKind},
        result::AnnotatedImage,
    },
};

/// Stroke and label dimensions for one image, scaled from its larger side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotationStyle {
    pub thickness: u32,
    pub text_padding: u32,
    /// Pixel height of id labels.
    pub font_px: f32,
}

impl AnnotationStyle {
    pub fn for_size(width: u32, height: u32) -> Self {
        let ratio = width.max(height) as f32 / ANNOTATION_REFERENCE_SIZE;
        Self {
            thickness: ((3.0 * ratio) as u32).max(1),
            text_padding: ((3.0 * ratio) as u32).max(1),
            font_px: (40.0 * ratio).max(12.0),
        }
    }
}

pub fn kind_color(kind: ElementKind) -> Rgba<u8> {
    match kind {
        ElementKind::Text => Rgba(TEXT_COLOR),
        ElementKind::Icon => Rgba(ICON_COLOR),
    }
}

/// Draws element boxes and id labels onto a copy of the screenshot.
#[derive(Clone)]
pub struct Annotator {
    font: FontArc,
}

impl Annotator {
    /// Annotator labelling with the bundled DejaVu Sans.
    pub fn new() -> Result<Self> {
        let font = FontArc::try_from_slice(FONT).context(FontSnafu {})?;
        Ok(Self { font })
    }

    /// Annotator labelling with the TrueType/OpenType font at `path`.
    pub fn with_font_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).context(IoReadSnafu {
            path: path.to_string_lossy(),
        })?;
        let font = FontArc::try_from_vec(data).context(FontSnafu {})?;
        Ok(Self { font })
    }

    /// Renders `elements` over `image` and returns the PNG-encoded result.
    /// `image` itself is never modified.
    pub fn annotate(&self, image: &DynamicImage, elements: &[Element]) -> Result<AnnotatedImage> {
        let canvas = self.draw(image, elements);
        let (width, height) = canvas.dimensions();

        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(canvas)
            .write_to(&mut buffer, ImageFormat::Png)
            .context(ImageEncodeSnafu {})?;

        debug!("annotated {} elements on {}x{}", elements.len(), width, height);

        Ok(AnnotatedImage {
            png: Bytes::from(buffer.into_inner()),
            width,
            height,
        })
    }

    pub fn draw(&self, image: &DynamicImage, elements: &[Element]) -> RgbaImage {
        let mut canvas = image.to_rgba8();
        let (width, height) = canvas.dimensions();
        let style = AnnotationStyle::for_size(width, height);

        for element in elements {
            let [x1, y1, x2, y2] = element.bbox.to_pixels(width, height);
            let box_w = x2.saturating_sub(x1);
            let box_h = y2.saturating_sub(y1);
            if box_w == 0 || box_h == 0 {
                continue;
            }

            let color = kind_color(element.kind);

            // Draw multiple rectangles to create thicker lines
            for offset in 0..style.thickness as i32 {
                let thick_rect = Rect::at(x1 as i32 - offset, y1 as i32 - offset)
                    .of_size(box_w + (offset * 2) as u32, box_h + (offset * 2) as u32);
                draw_hollow_rect_mut(&mut canvas, thick_rect, color);
            }

            self.draw_label(&mut canvas, &element.id.to_string(), x1, y1, color, &style);
        }

        canvas
    }

    fn draw_label(
        &self,
        canvas: &mut RgbaImage,
        label: &str,
        x: u32,
        y: u32,
        color: Rgba<u8>,
        style: &AnnotationStyle,
    ) {
        let scale = PxScale::from(style.font_px);
        let (text_w, text_h) = text_size(scale, &self.font, label);

        let pad = style.text_padding;
        let label_w = text_w + pad * 2;
        let label_h = text_h + pad * 2;

        // Above the box when there is room, inside it otherwise.
        let label_y = if y >= label_h { y - label_h } else { y };
        let label_x = x.min(canvas.width().saturating_sub(label_w));

        draw_filled_rect_mut(
            canvas,
            Rect::at(label_x as i32, label_y as i32).of_size(label_w.max(1), label_h.max(1)),
            color,
        );

        let text_color = Rgba([255, 255, 255, 255]);
        draw_text_mut(
            canvas,
            text_color,
            (label_x + pad) as i32,
            (label_y + pad) as i32,
            scale,
            &self.font,
            label,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::bbox::Bbox;

    fn element(id: usize, kind: ElementKind, xyxy: [f32; 4]) -> Element {
        Element {
            id,
            kind,
            bbox: Bbox::from_xyxy(xyxy),
            interactive: kind.default_interactive(),
            content: String::new(),
            source: kind.source(),
        }
    }

    #[test]
    fn test_style_scales_with_size() {
        let small = AnnotationStyle::for_size(800, 600);
        assert_eq!(small.thickness, 1);
        assert_eq!(small.font_px, 12.0);

        let large = AnnotationStyle::for_size(3200, 1800);
        assert_eq!(large.thickness, 3);
        assert_eq!(large.font_px, 40.0);
    }

    #[test]
    fn test_draw_uses_kind_colors_and_keeps_source() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(200, 100, Rgba([255; 4])));
        let elements = vec![
            element(0, ElementKind::Text, [0.1, 0.4, 0.4, 0.8]),
            element(1, ElementKind::Icon, [0.6, 0.4, 0.9, 0.8]),
        ];

        let canvas = Annotator::new().unwrap().draw(&image, &elements);
        assert_eq!(canvas.dimensions(), (200, 100));

        // bottom edges are never covered by labels
        assert_eq!(*canvas.get_pixel(40, 79), Rgba(TEXT_COLOR));
        assert_eq!(*canvas.get_pixel(150, 79), Rgba(ICON_COLOR));

        // source untouched
        assert!(image.to_rgba8().pixels().all(|p| p.0 == [255; 4]));
    }

    #[test]
    fn test_annotate_encodes_png() {
        let image = DynamicImage::new_rgb8(64, 32);
        let elements = vec![element(0, ElementKind::Icon, [0.0, 0.0, 0.5, 0.5])];

        let annotated = Annotator::new().unwrap().annotate(&image, &elements).unwrap();
        assert_eq!((annotated.width, annotated.height), (64, 32));

        let decoded = image::load_from_memory(&annotated.png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 32));
    }

    #[test]
    fn test_labels_rendered_with_bundled_font() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(400, 200, Rgba([0, 0, 0, 255])));
        let elements = vec![element(7, ElementKind::Icon, [0.25, 0.5, 0.75, 0.9])];

        let canvas = Annotator::new().unwrap().draw(&image, &elements);
        let style = AnnotationStyle::for_size(400, 200);
        let font = FontArc::try_from_slice(FONT).unwrap();
        let (text_w, text_h) = text_size(PxScale::from(style.font_px), &font, "7");
        assert!(text_w > 0 && text_h > 0);

        // label tag sits right above the box top
        let [x1, y1, ..] = elements[0].bbox.to_pixels(400, 200);
        let label_h = text_h + style.text_padding * 2;
        let label_w = text_w + style.text_padding * 2;
        let tag = (x1..x1 + label_w).flat_map(|x| (y1 - label_h..y1).map(move |y| (x, y)));
        let pixels: Vec<_> = tag.map(|(x, y)| *canvas.get_pixel(x, y)).collect();
        assert!(pixels.contains(&Rgba(ICON_COLOR)));
        // glyph strokes are blended towards white
        assert!(pixels.iter().any(|p| p.0 != ICON_COLOR && p.0[1] > ICON_COLOR[1]));
    }

    #[test]
    fn test_missing_font_file() {
        let err = Annotator::with_font_file("/nonexistent/font.ttf").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
