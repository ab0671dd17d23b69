use tracing::*;

use crate::{
    analysis::reconcile::Reconciled,
    layout::{
        element::{Element, ElementKind},
        result::{CoordinateMap, coordinate_map},
    },
};

/// Elements of one run before captions are attached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fused {
    pub elements: Vec<Element>,
    pub coordinate_map: CoordinateMap,
}

/// Turns reconciled detections into elements.
///
/// Boxes entirely outside the unit square are dropped and the rest clamped
/// into it. Ids follow reading order starting at zero. Icon content stays
/// empty until [`apply_captions`] runs.
pub fn fuse(mut reconciled: Reconciled, line_tolerance: f32) -> Fused {
    let before = reconciled.texts.len() + reconciled.icons.len();

    reconciled.texts.retain(|text| !text.bbox.is_outside_unit());
    reconciled.icons.retain(|icon| !icon.bbox.is_outside_unit());
    for text in &mut reconciled.texts {
        text.bbox = text.bbox.clamp_unit();
    }
    for icon in &mut reconciled.icons {
        icon.bbox = icon.bbox.clamp_unit();
    }
    // clamping can flatten a box that only touched an edge
    reconciled.texts.retain(|text| !text.bbox.is_degenerate());
    reconciled.icons.retain(|icon| !icon.bbox.is_degenerate());

    let elements: Vec<Element> = reconciled
        .into_reading_order(line_tolerance)
        .into_iter()
        .enumerate()
        .map(|(id, candidate)| Element {
            id,
            kind: candidate.kind,
            bbox: candidate.bbox,
            interactive: candidate
                .interactive
                .unwrap_or_else(|| candidate.kind.default_interactive()),
            content: match candidate.kind {
                ElementKind::Text => candidate.text.unwrap_or_default(),
                ElementKind::Icon => String::new(),
            },
            source: candidate.kind.source(),
        })
        .collect();

    if elements.len() < before {
        debug!(
            "dropped {} boxes outside the image",
            before - elements.len()
        );
    }

    Fused {
        coordinate_map: coordinate_map(&elements),
        elements,
    }
}

/// Writes captions onto icon elements, in element order.
pub fn apply_captions(elements: &mut [Element], captions: Vec<String>) {
    let icons = elements.iter_mut().filter(|element| element.is_icon());
    for (element, caption) in icons.zip(captions) {
        element.content = caption;
    }
}
