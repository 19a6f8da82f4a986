//! Rectangle types.
//!
//! These are used for palm detection boxes and for the regions of interest the landmark network is
//! run on. All coordinates are in pixels, with Y pointing down.

use std::fmt;

use nalgebra::{Point2, Rotation2, Vector2};

/// An axis-aligned rectangle.
///
/// Rectangles are allowed to have zero height and/or width. Negative dimensions are not allowed.
#[derive(Clone, Copy, PartialEq)]
pub struct Rect {
    center: Point2<f32>,
    size: Vector2<f32>,
}

impl Rect {
    /// Creates a rectangle extending outwards from a center point.
    #[inline]
    pub fn from_center(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self {
            center: Point2::new(x_center, y_center),
            size: Vector2::new(width, height),
        }
    }

    /// Returns the X coordinate of the left edge.
    #[inline]
    pub fn x(&self) -> f32 {
        self.center.x - self.size.x * 0.5
    }

    /// Returns the Y coordinate of the top edge.
    #[inline]
    pub fn y(&self) -> f32 {
        self.center.y - self.size.y * 0.5
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.size.x
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.size.y
    }

    #[inline]
    pub fn center(&self) -> Point2<f32> {
        self.center
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    fn intersection_area(&self, other: &Self) -> f32 {
        let x0 = self.x().max(other.x());
        let y0 = self.y().max(other.y());
        let x1 = (self.x() + self.width()).min(other.x() + other.width());
        let y1 = (self.y() + self.height()).min(other.y() + other.height());
        if x0 > x1 || y0 > y1 {
            return 0.0;
        }
        (x1 - x0) * (y1 - y0)
    }

    /// Computes the Intersection over Union (IOU) of `self` and `other`.
    ///
    /// Two empty rectangles have an IOU of 0.0.
    pub fn iou(&self, other: &Self) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

impl fmt::Debug for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rect @ ({},{})/{}x{}",
            self.x(),
            self.y(),
            self.width(),
            self.height()
        )
    }
}

/// A [`Rect`], rotated clockwise around its center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    rect: Rect,
    radians: f32,
}

impl RotatedRect {
    /// Creates a new rotated rectangle.
    ///
    /// `radians` is the clockwise rotation to apply to the [`Rect`].
    #[inline]
    pub fn new(rect: Rect, radians: f32) -> Self {
        Self { rect, radians }
    }

    #[inline]
    pub fn rect(&self) -> &Rect {
        &self.rect
    }

    /// Returns the rectangle's clockwise rotation in radians.
    #[inline]
    pub fn rotation_radians(&self) -> f32 {
        self.radians
    }

    /// Transforms a point from the [`RotatedRect`]'s coordinate system to the parent system.
    ///
    /// The origin of the inner coordinate system is formed by the top left corner of the rectangle.
    pub fn transform_out(&self, x: f32, y: f32) -> [f32; 2] {
        let rel = Vector2::new(x, y) - self.rect.size * 0.5;
        let p = self.rect.center + Rotation2::new(self.radians) * rel;
        [p.x, p.y]
    }
}
