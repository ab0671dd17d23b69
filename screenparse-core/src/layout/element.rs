use glam::UVec2;
use serde::{Deserialize, Serialize};

use crate::analysis::bbox::Bbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Text,
    Icon,
}

impl ElementKind {
    /// Interactivity applied when the detector supplies no hint.
    pub fn default_interactive(self) -> bool {
        match self {
            ElementKind::Text => false,
            ElementKind::Icon => true,
        }
    }

    pub fn source(self) -> Source {
        match self {
            ElementKind::Text => Source::Ocr,
            ElementKind::Icon => Source::Detector,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementKind::Text => "text",
            ElementKind::Icon => "icon",
        }
    }
}

/// Which detector produced an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Ocr,
    Detector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: usize,
    #[serde(rename = "type")]
    pub kind: ElementKind,
    /// `[x1, y1, x2, y2]` in the unit square.
    pub bbox: Bbox,
    pub interactive: bool,
    pub content: String,
    pub source: Source,
}

impl Element {
    /// Pixel center of the element on an image of the given size.
    pub fn center_px(&self, width: u32, height: u32) -> UVec2 {
        let [x1, y1, x2, y2] = self.bbox.to_pixels(width, height);
        UVec2::new((x1 + x2) / 2, (y1 + y2) / 2)
    }

    pub fn is_text(&self) -> bool {
        self.kind == ElementKind::Text
    }

    pub fn is_icon(&self) -> bool {
        self.kind == ElementKind::Icon
    }
}
