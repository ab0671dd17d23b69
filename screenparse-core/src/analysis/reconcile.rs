use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    analysis::bbox::Bbox,
    consts::{CROSS_TYPE_IOU_THRESHOLD, ICON_SCORE_FLOOR, SAME_TYPE_IOU_THRESHOLD},
    inference::detector::{IconDetection, TextDetection},
    layout::element::ElementKind,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// IoU above which a text box and an icon box conflict.
    pub cross_iou_threshold: f32,
    /// IoU above which two boxes of the same detector are duplicates.
    pub same_type_iou_threshold: f32,
    /// Score an icon must exceed to win a conflict against a text box.
    pub icon_score_floor: f32,
    /// Height of the rows (unit-square units) boxes are bucketed into before
    /// the left-to-right ordering applies. `0.0` orders by the exact top edge.
    pub line_tolerance: f32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            cross_iou_threshold: CROSS_TYPE_IOU_THRESHOLD,
            same_type_iou_threshold: SAME_TYPE_IOU_THRESHOLD,
            icon_score_floor: ICON_SCORE_FLOOR,
            line_tolerance: 0.0,
        }
    }
}

/// Surviving detections, partitioned by type, each in original detector order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    pub texts: Vec<TextDetection>,
    pub icons: Vec<IconDetection>,
}

/// A reconciled box ready for id assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub kind: ElementKind,
    pub bbox: Bbox,
    /// OCR string for text candidates.
    pub text: Option<String>,
    pub confidence: f32,
    pub interactive: Option<bool>,
}

trait Scored {
    fn bbox(&self) -> &Bbox;
    fn score(&self) -> f32;
}

impl Scored for TextDetection {
    fn bbox(&self) -> &Bbox {
        &self.bbox
    }

    fn score(&self) -> f32 {
        self.confidence
    }
}

impl Scored for IconDetection {
    fn bbox(&self) -> &Bbox {
        &self.bbox
    }

    fn score(&self) -> f32 {
        self.score
    }
}

/// Merges raw text and icon detections into one non-overlapping set.
///
/// 1. degenerate boxes are dropped,
/// 2. each type is de-duplicated on its own with greedy NMS,
/// 3. text/icon pairs overlapping above the cross-type threshold keep the icon
///    when its score exceeds the floor, the text otherwise.
pub fn reconcile(
    texts: Vec<TextDetection>,
    icons: Vec<IconDetection>,
    config: &ReconcileConfig,
) -> Reconciled {
    let raw_texts = texts.len();
    let raw_icons = icons.len();

    let texts = drop_degenerate(texts);
    let icons = drop_degenerate(icons);

    let mut texts = nms(texts, config.same_type_iou_threshold);
    let mut icons = nms(icons, config.same_type_iou_threshold);

    let (text_keep, icon_keep) = resolve_cross_type(&texts, &icons, config);
    retain_flags(&mut texts, &text_keep);
    retain_flags(&mut icons, &icon_keep);

    debug!(
        raw_texts,
        raw_icons,
        texts = texts.len(),
        icons = icons.len(),
        "reconciled detections"
    );

    Reconciled { texts, icons }
}

fn drop_degenerate<T: Scored>(detections: Vec<T>) -> Vec<T> {
    detections
        .into_iter()
        .filter(|det| !det.bbox().is_degenerate())
        .collect()
}

/// Greedy non-maximum suppression that keeps the surviving boxes in their
/// original order. Equal scores favour the earlier detection.
fn nms<T: Scored>(mut detections: Vec<T>, iou_threshold: f32) -> Vec<T> {
    if detections.len() < 2 {
        return detections;
    }

    // Sort indices by confidence score in descending order; the sort is stable
    // so insertion order breaks ties.
    let mut order: Vec<usize> = (0..detections.len()).collect();
    order.sort_by(|&a, &b| detections[b].score().total_cmp(&detections[a].score()));

    let mut keep_flags = vec![true; detections.len()];
    for (rank, &current) in order.iter().enumerate() {
        if !keep_flags[current] {
            continue;
        }
        for &lower in &order[rank + 1..] {
            if keep_flags[lower]
                && detections[current].bbox().iou(detections[lower].bbox()) > iou_threshold
            {
                keep_flags[lower] = false;
            }
        }
    }

    retain_flags(&mut detections, &keep_flags);
    detections
}

fn resolve_cross_type(
    texts: &[TextDetection],
    icons: &[IconDetection],
    config: &ReconcileConfig,
) -> (Vec<bool>, Vec<bool>) {
    let mut text_keep = vec![true; texts.len()];
    let mut icon_keep = vec![true; icons.len()];

    // Strongest icons claim their region first.
    let mut order: Vec<usize> = (0..icons.len()).collect();
    order.sort_by(|&a, &b| icons[b].score.total_cmp(&icons[a].score));

    for icon_index in order {
        let icon = &icons[icon_index];
        let icon_wins = icon.score > config.icon_score_floor;

        for (text_index, text) in texts.iter().enumerate() {
            if !text_keep[text_index] {
                continue;
            }
            if icon.bbox.iou(&text.bbox) <= config.cross_iou_threshold {
                continue;
            }
            if icon_wins {
                text_keep[text_index] = false;
            } else {
                icon_keep[icon_index] = false;
                break;
            }
        }
    }

    (text_keep, icon_keep)
}

fn retain_flags<T>(items: &mut Vec<T>, keep_flags: &[bool]) {
    let mut flags = keep_flags.iter();
    items.retain(|_| flags.next().copied().unwrap_or(false));
}

impl Reconciled {
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty() && self.icons.is_empty()
    }

    /// Flattens both partitions into reading order: top-to-bottom, then
    /// left-to-right by the top-left corner. Tops within `line_tolerance`
    /// of a row's first top share that row. Ties fall back to insertion
    /// order, text detections before icon detections.
    pub fn into_reading_order(self, line_tolerance: f32) -> Vec<Candidate> {
        let texts = self.texts.into_iter().map(|text| Candidate {
            kind: ElementKind::Text,
            bbox: text.bbox,
            text: Some(text.text),
            confidence: text.confidence,
            interactive: text.interactive,
        });
        let icons = self.icons.into_iter().map(|icon| Candidate {
            kind: ElementKind::Icon,
            bbox: icon.bbox,
            text: None,
            confidence: icon.score,
            interactive: icon.interactive,
        });

        // Concatenation order is the insertion order; both sorts are stable.
        let mut candidates: Vec<Candidate> = texts.chain(icons).collect();
        candidates.sort_by(|a, b| a.bbox.min.y.total_cmp(&b.bbox.min.y));

        let tolerance = line_tolerance.max(0.0);
        let mut start = 0;
        while start < candidates.len() {
            let anchor = candidates[start].bbox.min.y;
            let end = candidates[start..]
                .iter()
                .position(|c| c.bbox.min.y - anchor > tolerance)
                .map_or(candidates.len(), |offset| start + offset);
            candidates[start..end].sort_by(|a, b| a.bbox.min.x.total_cmp(&b.bbox.min.x));
            start = end;
        }

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(xyxy: [f32; 4], content: &str, confidence: f32) -> TextDetection {
        TextDetection::new(Bbox::from_xyxy(xyxy), content, confidence)
    }

    fn icon(xyxy: [f32; 4], score: f32) -> IconDetection {
        IconDetection::new(Bbox::from_xyxy(xyxy), score)
    }

    #[test]
    fn test_empty_inputs() {
        let reconciled = reconcile(Vec::new(), Vec::new(), &ReconcileConfig::default());
        assert!(reconciled.is_empty());
    }

    #[test]
    fn test_one_side_empty_passes_through() {
        let texts = vec![
            text([0.1, 0.1, 0.3, 0.2], "File", 0.9),
            text([0.4, 0.1, 0.6, 0.2], "Edit", 0.8),
        ];
        let reconciled = reconcile(texts.clone(), Vec::new(), &ReconcileConfig::default());
        assert_eq!(reconciled.texts, texts);

        let icons = vec![icon([0.1, 0.5, 0.2, 0.6], 0.3)];
        let reconciled = reconcile(Vec::new(), icons.clone(), &ReconcileConfig::default());
        assert_eq!(reconciled.icons, icons);
    }

    #[test]
    fn test_duplicate_icons_keep_higher_score() {
        // IoU = 0.81 / 0.99 ≈ 0.818 > 0.8
        let icons = vec![
            icon([0.0, 0.0, 0.9, 0.9], 0.4),
            icon([0.0, 0.0, 0.9, 0.99], 0.7),
        ];
        let reconciled = reconcile(Vec::new(), icons, &ReconcileConfig::default());
        assert_eq!(reconciled.icons.len(), 1);
        assert_eq!(reconciled.icons[0].score, 0.7);
    }

    #[test]
    fn test_duplicate_texts_keep_higher_confidence() {
        let texts = vec![
            text([0.1, 0.1, 0.5, 0.2], "Document 1", 0.95),
            text([0.1, 0.1, 0.5, 0.205], "Docurnent 1", 0.6),
        ];
        let reconciled = reconcile(texts, Vec::new(), &ReconcileConfig::default());
        assert_eq!(reconciled.texts.len(), 1);
        assert_eq!(reconciled.texts[0].text, "Document 1");
    }

    #[test]
    fn test_nms_preserves_detector_order() {
        let icons = vec![
            icon([0.5, 0.5, 0.6, 0.6], 0.2),
            icon([0.1, 0.1, 0.2, 0.2], 0.9),
            icon([0.7, 0.7, 0.8, 0.8], 0.5),
        ];
        let reconciled = reconcile(Vec::new(), icons.clone(), &ReconcileConfig::default());
        assert_eq!(reconciled.icons, icons);
    }

    #[test]
    fn test_cross_type_icon_wins_above_floor() {
        let texts = vec![text([0.1, 0.1, 0.3, 0.2], "Save", 0.99)];
        let icons = vec![icon([0.1, 0.1, 0.3, 0.21], 0.6)];
        let reconciled = reconcile(texts, icons, &ReconcileConfig::default());
        assert!(reconciled.texts.is_empty());
        assert_eq!(reconciled.icons.len(), 1);
    }

    #[test]
    fn test_cross_type_text_wins_below_floor() {
        let texts = vec![text([0.1, 0.1, 0.3, 0.2], "Save", 0.99)];
        let icons = vec![icon([0.1, 0.1, 0.3, 0.21], 0.1)];
        let reconciled = reconcile(texts, icons, &ReconcileConfig::default());
        assert_eq!(reconciled.texts.len(), 1);
        assert!(reconciled.icons.is_empty());
    }

    #[test]
    fn test_cross_type_below_threshold_keeps_both() {
        // IoU = 0.5
        let texts = vec![text([0.0, 0.0, 0.2, 0.1], "label", 0.9)];
        let icons = vec![icon([0.0, 0.0, 0.2, 0.2], 0.9)];
        let reconciled = reconcile(texts, icons, &ReconcileConfig::default());
        assert_eq!(reconciled.texts.len(), 1);
        assert_eq!(reconciled.icons.len(), 1);
    }

    #[test]
    fn test_no_conflicting_pair_survives() {
        let texts = vec![
            text([0.10, 0.10, 0.30, 0.20], "a", 0.9),
            text([0.50, 0.50, 0.70, 0.60], "b", 0.9),
            text([0.11, 0.10, 0.31, 0.20], "c", 0.5),
        ];
        let icons = vec![
            icon([0.10, 0.10, 0.30, 0.205], 0.8),
            icon([0.50, 0.50, 0.70, 0.61], 0.05),
            icon([0.80, 0.80, 0.90, 0.90], 0.3),
        ];
        let config = ReconcileConfig::default();
        let reconciled = reconcile(texts, icons, &config);
        for text in &reconciled.texts {
            for icon in &reconciled.icons {
                assert!(text.bbox.iou(&icon.bbox) <= config.cross_iou_threshold);
            }
        }
        assert_eq!(reconciled.texts.len(), 1);
        assert_eq!(reconciled.texts[0].text, "b");
        assert_eq!(reconciled.icons.len(), 2);
    }

    #[test]
    fn test_degenerate_boxes_dropped() {
        let texts = vec![text([0.2, 0.2, 0.2, 0.4], "zero width", 0.9)];
        let icons = vec![icon([0.2, 0.3, 0.4, 0.3], 0.9)];
        let reconciled = reconcile(texts, icons, &ReconcileConfig::default());
        assert!(reconciled.is_empty());
    }

    #[test]
    fn test_reading_order() {
        let reconciled = Reconciled {
            texts: vec![
                text([0.5, 0.1, 0.7, 0.2], "right", 0.9),
                text([0.1, 0.5, 0.3, 0.6], "bottom", 0.9),
            ],
            icons: vec![
                icon([0.1, 0.1, 0.2, 0.2], 0.9),
                // same top-left as the first text: text goes first
                icon([0.5, 0.1, 0.6, 0.15], 0.9),
            ],
        };
        let ordered = reconciled.into_reading_order(0.0);
        let kinds: Vec<_> = ordered.iter().map(|c| (c.kind, c.bbox.min.x)).collect();
        assert_eq!(
            kinds,
            vec![
                (ElementKind::Icon, 0.1),
                (ElementKind::Text, 0.5),
                (ElementKind::Icon, 0.5),
                (ElementKind::Text, 0.1),
            ]
        );
    }

    #[test]
    fn test_reading_order_line_tolerance() {
        let reconciled = Reconciled {
            texts: vec![
                text([0.5, 0.101, 0.7, 0.2], "slightly lower", 0.9),
                text([0.1, 0.104, 0.3, 0.2], "left", 0.9),
            ],
            icons: Vec::new(),
        };
        let strict = reconciled.clone().into_reading_order(0.0);
        assert_eq!(strict[0].text.as_deref(), Some("slightly lower"));

        let grouped = reconciled.into_reading_order(0.05);
        assert_eq!(grouped[0].text.as_deref(), Some("left"));
    }

    #[test]
    fn test_line_tolerance_spans_multiples() {
        // tops on either side of 0.1 still form one line
        let reconciled = Reconciled {
            texts: vec![
                text([0.6, 0.099, 0.8, 0.2], "right", 0.9),
                text([0.1, 0.101, 0.3, 0.2], "left", 0.9),
            ],
            icons: vec![icon([0.4, 0.1, 0.5, 0.2], 0.9)],
        };
        let ordered = reconciled.into_reading_order(0.05);
        let xs: Vec<_> = ordered.iter().map(|c| c.bbox.min.x).collect();
        assert_eq!(xs, vec![0.1, 0.4, 0.6]);
    }

    #[test]
    fn test_rows_anchor_on_first_top() {
        // 0.16 is within tolerance of 0.12 but not of the row's first top
        let reconciled = Reconciled {
            texts: vec![
                text([0.7, 0.08, 0.9, 0.1], "a", 0.9),
                text([0.5, 0.12, 0.6, 0.2], "b", 0.9),
                text([0.1, 0.16, 0.3, 0.2], "c", 0.9),
            ],
            icons: Vec::new(),
        };
        let ordered = reconciled.into_reading_order(0.05);
        let texts: Vec<_> = ordered.iter().filter_map(|c| c.text.as_deref()).collect();
        assert_eq!(texts, vec!["b", "a", "c"]);
    }
}
