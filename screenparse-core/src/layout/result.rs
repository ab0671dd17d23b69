use std::{collections::BTreeMap, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::layout::element::{Element, ElementKind};

/// Element id (decimal string) to `[x, y, width, height]` in the unit square.
pub type CoordinateMap = BTreeMap<String, [f32; 4]>;

/// Derives the coordinate map for a finished element list.
pub fn coordinate_map(elements: &[Element]) -> CoordinateMap {
    elements
        .iter()
        .map(|element| (element.id.to_string(), element.bbox.xywh()))
        .collect()
}

/// PNG-encoded copy of the input with element boxes drawn on top.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedImage {
    pub png: Bytes,
    pub width: u32,
    pub height: u32,
}

impl AnnotatedImage {
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.png)
    }
}

impl Serialize for AnnotatedImage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
}

/// Wall-clock time spent in each stage, serialized as fractional seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StageTimings {
    #[serde(serialize_with = "as_secs")]
    pub detect_text: Duration,
    #[serde(serialize_with = "as_secs")]
    pub detect_icons: Duration,
    #[serde(serialize_with = "as_secs")]
    pub reconcile: Duration,
    #[serde(serialize_with = "as_secs")]
    pub fuse: Duration,
    #[serde(serialize_with = "as_secs")]
    pub caption: Duration,
    #[serde(serialize_with = "as_secs")]
    pub annotate: Duration,
    #[serde(serialize_with = "as_secs")]
    pub total: Duration,
}

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ElementCount {
    pub total: usize,
    pub text: usize,
    pub icon: usize,
}

/// Output of one successful analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub run_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotated_image: Option<AnnotatedImage>,
    pub coordinate_map: CoordinateMap,
    pub elements: Vec<Element>,
    pub timings: StageTimings,
    pub image_info: ImageInfo,
}

impl AnalysisResult {
    pub fn text_elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(|element| element.is_text())
    }

    pub fn icon_elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(|element| element.is_icon())
    }

    pub fn element_count(&self) -> ElementCount {
        let text = self
            .elements
            .iter()
            .filter(|element| element.kind == ElementKind::Text)
            .count();
        ElementCount {
            total: self.elements.len(),
            text,
            icon: self.elements.len() - text,
        }
    }

    /// First element whose content contains the query or is contained by it,
    /// ignoring case. Empty queries and empty contents never match.
    pub fn find_by_description(&self, query: &str) -> Option<&Element> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return None;
        }

        self.elements.iter().find(|element| {
            let content = element.content.trim().to_lowercase();
            !content.is_empty() && (content.contains(&query) || query.contains(&content))
        })
    }

    pub fn element(&self, id: usize) -> Option<&Element> {
        self.elements.get(id).filter(|element| element.id == id)
    }
}
