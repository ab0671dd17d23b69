use glam::Vec2;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A 2D axis-aligned bounding box represented by minimum and maximum points.
///
/// Detectors emit boxes in pixel space; the pipeline carries them normalized to
/// the unit square (`x / image_width`, `y / image_height`). Both spaces share
/// this type, the image origin is top-left with Y increasing downward.
///
/// Serialized as `[x1, y1, x2, y2]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bbox {
    /// The top-left corner.
    pub min: Vec2,
    /// The bottom-right corner.
    pub max: Vec2,
}

impl Bbox {
    /// Creates a new bounding box from minimum and maximum points.
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use screenparse_core::analysis::bbox::Bbox;
    /// let bbox = Bbox::new(Vec2::new(0.0, 0.0), Vec2::new(10.0, 5.0));
    /// assert_eq!(bbox.width(), 10.0);
    /// ```
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Creates a bounding box from `(x1, y1, x2, y2)`.
    pub fn from_xyxy([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self::new(Vec2::new(x1, y1), Vec2::new(x2, y2))
    }

    /// Creates a bounding box from `(x, y, width, height)`.
    ///
    /// # Example
    /// ```
    /// use screenparse_core::analysis::bbox::Bbox;
    /// let bbox = Bbox::from_xywh([0.25, 0.5, 0.25, 0.125]);
    /// assert_eq!(bbox.xyxy(), [0.25, 0.5, 0.5, 0.625]);
    /// ```
    pub fn from_xywh([x, y, w, h]: [f32; 4]) -> Self {
        Self::new(Vec2::new(x, y), Vec2::new(x + w, y + h))
    }

    /// Creates a new bounding box from a center point and size vector.
    ///
    /// This constructor is used with YOLO-style detection outputs where
    /// bounding boxes are represented as (center_x, center_y, width, height).
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use screenparse_core::analysis::bbox::Bbox;
    /// // Create a bbox centered at (100, 200) with size 50x80
    /// let bbox = Bbox::from_center_size(Vec2::new(100.0, 200.0), Vec2::new(50.0, 80.0));
    /// assert_eq!(bbox.min, Vec2::new(75.0, 160.0));
    /// assert_eq!(bbox.max, Vec2::new(125.0, 240.0));
    /// ```
    pub fn from_center_size(center: Vec2, size: Vec2) -> Self {
        let half_size = size / 2.0;
        Self {
            min: center - half_size,
            max: center + half_size,
        }
    }

    /// Returns the box as `[x1, y1, x2, y2]`.
    pub fn xyxy(&self) -> [f32; 4] {
        [self.min.x, self.min.y, self.max.x, self.max.y]
    }

    /// Returns the box as `[x, y, width, height]`, the shape used by the
    /// coordinate map.
    ///
    /// # Example
    /// ```
    /// use screenparse_core::analysis::bbox::Bbox;
    /// let bbox = Bbox::from_xyxy([0.25, 0.5, 0.75, 1.0]);
    /// assert_eq!(bbox.xywh(), [0.25, 0.5, 0.5, 0.5]);
    /// ```
    pub fn xywh(&self) -> [f32; 4] {
        [self.min.x, self.min.y, self.width(), self.height()]
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    /// Calculates the area of the bounding box.
    ///
    /// Inverted boxes report zero area rather than a negative one.
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use screenparse_core::analysis::bbox::Bbox;
    /// let bbox = Bbox::new(Vec2::ZERO, Vec2::new(4.0, 3.0));
    /// assert_eq!(bbox.area(), 12.0);
    /// ```
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// A box with no extent on either axis (`x1 >= x2` or `y1 >= y2`), or one
    /// carrying non-finite coordinates.
    pub fn is_degenerate(&self) -> bool {
        !self.min.is_finite()
            || !self.max.is_finite()
            || self.max.x <= self.min.x
            || self.max.y <= self.min.y
    }

    /// Calculates the area of intersection between this bounding box and another.
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use screenparse_core::analysis::bbox::Bbox;
    /// let bbox1 = Bbox::new(Vec2::new(0.0, 0.0), Vec2::new(4.0, 4.0));
    /// let bbox2 = Bbox::new(Vec2::new(2.0, 2.0), Vec2::new(6.0, 6.0));
    /// assert_eq!(bbox1.intersection(&bbox2), 4.0); // 2x2 intersection area
    /// ```
    pub fn intersection(&self, other: &Self) -> f32 {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);

        if max.x > min.x && max.y > min.y {
            (max.x - min.x) * (max.y - min.y)
        } else {
            0.
        }
    }

    /// Calculates the Intersection over Union (IoU) between this bounding box and another.
    ///
    /// Returns 0.0 when the union is empty.
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use screenparse_core::analysis::bbox::Bbox;
    /// let bbox1 = Bbox::new(Vec2::new(0.0, 0.0), Vec2::new(2.0, 2.0));
    /// let bbox2 = Bbox::new(Vec2::new(0.0, 0.0), Vec2::new(2.0, 2.0));
    /// assert_eq!(bbox1.iou(&bbox2), 1.0); // Identical boxes
    /// ```
    pub fn iou(&self, other: &Self) -> f32 {
        let intersection_area = self.intersection(other);
        let union_area = self.area() + other.area() - intersection_area;

        if union_area > 0.0 {
            intersection_area / union_area
        } else {
            0.0
        }
    }

    /// Clamps the bounding box coordinates to stay within the specified bounds.
    pub fn clamp(&self, min_bounds: Vec2, max_bounds: Vec2) -> Self {
        Self {
            min: self.min.max(min_bounds).min(max_bounds),
            max: self.max.min(max_bounds).max(min_bounds),
        }
    }

    /// Clamps to the unit square.
    pub fn clamp_unit(&self) -> Self {
        self.clamp(Vec2::ZERO, Vec2::ONE)
    }

    /// `true` when the box shares no area with the unit square.
    ///
    /// # Example
    /// ```
    /// use screenparse_core::analysis::bbox::Bbox;
    /// assert!(Bbox::from_xyxy([1.1, 0.2, 1.4, 0.3]).is_outside_unit());
    /// assert!(!Bbox::from_xyxy([0.9, 0.2, 1.4, 0.3]).is_outside_unit());
    /// ```
    pub fn is_outside_unit(&self) -> bool {
        self.max.x <= 0.0 || self.max.y <= 0.0 || self.min.x >= 1.0 || self.min.y >= 1.0
    }

    /// Scales both corners by a uniform factor.
    pub fn scale(&self, factor: f32) -> Self {
        Self {
            min: self.min * factor,
            max: self.max * factor,
        }
    }

    /// Converts a pixel-space box into unit-square coordinates.
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use screenparse_core::analysis::bbox::Bbox;
    /// let px = Bbox::new(Vec2::new(100.0, 50.0), Vec2::new(300.0, 150.0));
    /// assert_eq!(px.normalize(400, 200).xyxy(), [0.25, 0.25, 0.75, 0.75]);
    /// ```
    pub fn normalize(&self, width: u32, height: u32) -> Self {
        let size = Vec2::new(width.max(1) as f32, height.max(1) as f32);
        Self {
            min: self.min / size,
            max: self.max / size,
        }
    }

    /// Converts a unit-square box into pixel space, keeping fractions.
    pub fn denormalize(&self, width: u32, height: u32) -> Self {
        let size = Vec2::new(width as f32, height as f32);
        Self {
            min: self.min * size,
            max: self.max * size,
        }
    }

    /// Converts a unit-square box into integer pixel coordinates
    /// `[x1, y1, x2, y2]`, truncating toward zero.
    ///
    /// # Example
    /// ```
    /// use screenparse_core::analysis::bbox::Bbox;
    /// let bbox = Bbox::from_xyxy([0.5, 0.25, 0.75, 0.5]);
    /// assert_eq!(bbox.to_pixels(750, 1636), [375, 409, 562, 818]);
    /// ```
    pub fn to_pixels(&self, width: u32, height: u32) -> [u32; 4] {
        let px = self.denormalize(width, height);
        [
            px.min.x.max(0.0) as u32,
            px.min.y.max(0.0) as u32,
            px.max.x.max(0.0) as u32,
            px.max.y.max(0.0) as u32,
        ]
    }

    /// Converts integer pixel coordinates `[x1, y1, x2, y2]` into a
    /// unit-square box.
    pub fn from_pixels([x1, y1, x2, y2]: [u32; 4], width: u32, height: u32) -> Self {
        Self::new(
            Vec2::new(x1 as f32, y1 as f32),
            Vec2::new(x2 as f32, y2 as f32),
        )
        .normalize(width, height)
    }
}

impl Serialize for Bbox {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.xyxy().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Bbox {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        <[f32; 4]>::deserialize(deserializer).map(Self::from_xyxy)
    }
}
