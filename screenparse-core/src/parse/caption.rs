use std::{sync::Arc, time::Instant};

use image::{DynamicImage, imageops::FilterType};
use rayon::prelude::*;
use snafu::ResultExt;
use tracing::*;

use crate::{
    analysis::bbox::Bbox,
    error::{JoinSnafu, Result},
    inference::detector::Captioner,
    layout::element::Element,
};

/// Crops `bbox` out of `image` and resizes it to `size`. Boxes thinner than a
/// pixel are widened to one pixel.
pub fn crop_icon(image: &DynamicImage, bbox: &Bbox, size: (u32, u32)) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let [x1, y1, x2, y2] = bbox.to_pixels(width, height);

    let x = x1.min(width.saturating_sub(1));
    let y = y1.min(height.saturating_sub(1));
    let w = x2.saturating_sub(x).clamp(1, width - x);
    let h = y2.saturating_sub(y).clamp(1, height - y);

    image
        .crop_imm(x, y, w, h)
        .resize_exact(size.0.max(1), size.1.max(1), FilterType::Triangle)
}

/// Crops and resizes every box on the blocking pool, in box order.
pub async fn crop_icons(
    image: Arc<DynamicImage>,
    boxes: Vec<Bbox>,
    size: (u32, u32),
) -> Result<Vec<DynamicImage>> {
    tokio::task::spawn_blocking(move || {
        boxes
            .par_iter()
            .map(|bbox| crop_icon(&image, bbox, size))
            .collect::<Vec<_>>()
    })
    .await
    .context(JoinSnafu { stage: "caption" })
}

/// Captions every icon element, in element order.
///
/// The result always holds one entry per icon: a failed batch, a failed crop
/// or a missing captioner yields `placeholder` for the affected icons.
pub async fn caption_icons(
    captioner: Option<&dyn Captioner>,
    image: &Arc<DynamicImage>,
    elements: &[Element],
    batch_size: usize,
    placeholder: &str,
) -> Vec<String> {
    let boxes: Vec<Bbox> = elements
        .iter()
        .filter(|element| element.is_icon())
        .map(|element| element.bbox)
        .collect();

    if boxes.is_empty() {
        return Vec::new();
    }

    let Some(captioner) = captioner else {
        debug!("no captioner configured, {} icons keep the placeholder", boxes.len());
        return vec![placeholder.to_string(); boxes.len()];
    };

    let start = Instant::now();
    let icons = boxes.len();
    let crops = match crop_icons(Arc::clone(image), boxes, captioner.crop_size()).await {
        Ok(crops) => crops,
        Err(e) => {
            warn!("cropping {} icons failed: {}", icons, e);
            return vec![placeholder.to_string(); icons];
        }
    };

    let batch_size = batch_size.max(1);
    let mut captions = Vec::with_capacity(crops.len());
    let mut failed = 0;

    for (batch_index, batch) in crops.chunks(batch_size).enumerate() {
        match captioner.caption_batch(batch).await {
            Ok(results) => {
                if results.len() != batch.len() {
                    warn!(
                        "captioner `{}` returned {} captions for {} crops in batch {}",
                        captioner.name(),
                        results.len(),
                        batch.len(),
                        batch_index
                    );
                }
                let mut results = results.into_iter();
                for _ in batch {
                    match results.next() {
                        Some(Ok(caption)) if !caption.trim().is_empty() => captions.push(caption),
                        Some(Err(e)) => {
                            debug!("caption failed: {}", e);
                            failed += 1;
                            captions.push(placeholder.to_string());
                        }
                        _ => {
                            failed += 1;
                            captions.push(placeholder.to_string());
                        }
                    }
                }
            }
            Err(e) => {
                warn!(
                    "caption batch {} ({} crops) failed: {}",
                    batch_index,
                    batch.len(),
                    e
                );
                failed += batch.len();
                captions.extend(std::iter::repeat_n(placeholder.to_string(), batch.len()));
            }
        }
    }

    if failed > 0 {
        warn!("{} of {} icons captioned with placeholder", failed, crops.len());
    }
    info!(
        "captioned {} icons with `{}` in {:?}",
        crops.len(),
        captioner.name(),
        start.elapsed()
    );

    captions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::reconcile::Reconciled,
        inference::detector::{IconDetection, TextDetection},
        parse::{
            fixtures::{BrokenCaptioner, FakeCaptioner},
            fusion::fuse,
        },
    };

    fn elements(icons: usize) -> Vec<Element> {
        let icons = (0..icons)
            .map(|i| {
                let x = 0.05 + i as f32 * 0.09;
                IconDetection::new(Bbox::from_xyxy([x, 0.5, x + 0.05, 0.55]), 0.5)
            })
            .collect();
        let texts = vec![TextDetection::new(
            Bbox::from_xyxy([0.1, 0.1, 0.3, 0.15]),
            "Title",
            0.9,
        )];
        fuse(Reconciled { texts, icons }, 0.0).elements
    }

    #[test]
    fn test_crop_icon_size() {
        let image = DynamicImage::new_rgb8(100, 50);
        let crop = crop_icon(&image, &Bbox::from_xyxy([0.5, 0.5, 0.6, 0.7]), (64, 64));
        assert_eq!((crop.width(), crop.height()), (64, 64));

        // sub-pixel box at the far corner
        let crop = crop_icon(&image, &Bbox::from_xyxy([0.999, 0.999, 1.0, 1.0]), (8, 8));
        assert_eq!((crop.width(), crop.height()), (8, 8));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_crop_icons_keeps_box_order() {
        let mut canvas = image::RgbImage::new(100, 10);
        for (x, _, pixel) in canvas.enumerate_pixels_mut() {
            *pixel = image::Rgb([if x < 50 { 255 } else { 0 }, 0, if x < 50 { 0 } else { 255 }]);
        }
        let image = Arc::new(DynamicImage::ImageRgb8(canvas));
        let boxes = vec![
            Bbox::from_xyxy([0.6, 0.0, 0.9, 1.0]),
            Bbox::from_xyxy([0.1, 0.0, 0.4, 1.0]),
        ];

        let crops = crop_icons(image, boxes, (4, 4)).await.unwrap();
        assert_eq!(crops.len(), 2);
        let [r, _, b] = crops[0].to_rgb8().get_pixel(2, 2).0;
        assert!(r < 16 && b > 240);
        let [r, _, b] = crops[1].to_rgb8().get_pixel(2, 2).0;
        assert!(r > 240 && b < 16);
    }

    #[tokio::test]
    async fn test_captions_in_element_order_across_batches() {
        let image = Arc::new(DynamicImage::new_rgb8(200, 100));
        let elements = elements(5);
        let captioner = FakeCaptioner::default();

        let captions = caption_icons(Some(&captioner), &image, &elements, 2, "unknown").await;
        assert_eq!(captions, vec!["icon-0", "icon-1", "icon-2", "icon-3", "icon-4"]);
        assert_eq!(captioner.batches(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_failed_crops_become_placeholders() {
        let image = Arc::new(DynamicImage::new_rgb8(200, 100));
        let elements = elements(4);
        let captioner = FakeCaptioner::failing_every(2);

        let captions = caption_icons(Some(&captioner), &image, &elements, 128, "unknown").await;
        assert_eq!(captions, vec!["unknown", "icon-1", "unknown", "icon-3"]);
    }

    #[tokio::test]
    async fn test_failed_batch_and_short_reply_keep_length() {
        let image = Arc::new(DynamicImage::new_rgb8(200, 100));
        let elements = elements(3);

        let captions = caption_icons(Some(&BrokenCaptioner::Fails), &image, &elements, 2, "?").await;
        assert_eq!(captions, vec!["?", "?", "?"]);

        let captions =
            caption_icons(Some(&BrokenCaptioner::Truncates), &image, &elements, 128, "?").await;
        assert_eq!(captions.len(), 3);
        assert_eq!(captions[2], "?");
    }

    #[tokio::test]
    async fn test_without_captioner() {
        let image = Arc::new(DynamicImage::new_rgb8(200, 100));
        let captions = caption_icons(None, &image, &elements(2), 128, "unknown").await;
        assert_eq!(captions, vec!["unknown", "unknown"]);

        let captions = caption_icons(None, &image, &elements(0), 128, "unknown").await;
        assert!(captions.is_empty());
    }
}
