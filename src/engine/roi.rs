//! Rectangles describing where in a frame a network looks.
//!
//! All coordinates are in frame pixels, with `y` pointing down. Angles are in radians, clockwise
//! as seen on screen.

/// An axis-aligned rectangle, stored as center and size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    center: [f32; 2],
    size: [f32; 2],
}

impl Rect {
    #[inline]
    pub fn from_center(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self {
            center: [x_center, y_center],
            size: [width, height],
        }
    }

    /// Returns the smallest rectangle containing all `points`, or `None` if there are none.
    pub fn bounding<I: IntoIterator<Item = [f32; 2]>>(points: I) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let (min, max) = points.fold((first, first), |(min, max), [x, y]| {
            ([min[0].min(x), min[1].min(y)], [max[0].max(x), max[1].max(y)])
        });
        Some(Self::from_center(
            (min[0] + max[0]) * 0.5,
            (min[1] + max[1]) * 0.5,
            max[0] - min[0],
            max[1] - min[1],
        ))
    }

    #[inline]
    pub fn center(&self) -> [f32; 2] {
        self.center
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.size[0]
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.size[1]
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.center[0] - self.size[0] * 0.5
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.center[1] - self.size[1] * 0.5
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Adds `amount` times the width to the left and right, and `amount` times the height to the
    /// top and bottom.
    #[must_use]
    pub fn grow_rel(&self, amount: f32) -> Self {
        let [w, h] = self.size;
        Self {
            center: self.center,
            size: [w + 2.0 * w * amount, h + 2.0 * h * amount],
        }
    }

    /// Extends the shorter side so that the rectangle becomes a square.
    #[must_use]
    pub fn square(&self) -> Self {
        let side = self.width().max(self.height());
        Self {
            center: self.center,
            size: [side, side],
        }
    }

    fn intersection_area(&self, other: &Rect) -> f32 {
        let w = (self.x() + self.width()).min(other.x() + other.width()) - self.x().max(other.x());
        let h = (self.y() + self.height()).min(other.y() + other.height()) - self.y().max(other.y());
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }

    /// Computes the Intersection over Union (IoU) of `self` and `other`.
    pub fn iou(&self, other: &Rect) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// A [`Rect`], rotated clockwise around its center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    rect: Rect,
    radians: f32,
}

impl RotatedRect {
    #[inline]
    pub fn new(rect: Rect, radians: f32) -> Self {
        Self { rect, radians }
    }

    /// Returns the smallest rectangle rotated by `radians` that contains all `points`.
    pub fn bounding<I: IntoIterator<Item = [f32; 2]>>(radians: f32, points: I) -> Option<Self> {
        // Rotate everything upright, bound it there, then rotate the center back.
        let upright = Rect::bounding(points.into_iter().map(|p| rotate(p, -radians)))?;
        let [x, y] = rotate(upright.center(), radians);
        Some(Self::new(
            Rect::from_center(x, y, upright.width(), upright.height()),
            radians,
        ))
    }

    #[inline]
    pub fn rect(&self) -> &Rect {
        &self.rect
    }

    #[inline]
    pub fn rotation_radians(&self) -> f32 {
        self.radians
    }

    /// Applies `f` to the unrotated rectangle.
    #[must_use]
    pub fn map(self, f: impl FnOnce(Rect) -> Rect) -> Self {
        Self {
            rect: f(self.rect),
            ..self
        }
    }

    /// Moves the center by `offset`, given in the rectangle's own (rotated) axes.
    #[must_use]
    pub fn shift(self, offset: [f32; 2]) -> Self {
        let [dx, dy] = rotate(offset, self.radians);
        let [x, y] = self.rect.center();
        self.map(|r| Rect::from_center(x + dx, y + dy, r.width(), r.height()))
    }

    /// Maps a point relative to the top left corner of the rotated rectangle to frame coordinates.
    pub fn transform_out(&self, [x, y]: [f32; 2]) -> [f32; 2] {
        let [w, h] = [self.rect.width(), self.rect.height()];
        let [cx, cy] = self.rect.center();
        let [rx, ry] = rotate([x - w * 0.5, y - h * 0.5], self.radians);
        [cx + rx, cy + ry]
    }

    /// Maps a frame point into the rotated rectangle's coordinate system (origin at its top left).
    pub fn transform_in(&self, [x, y]: [f32; 2]) -> [f32; 2] {
        let [w, h] = [self.rect.width(), self.rect.height()];
        let [cx, cy] = self.rect.center();
        let [rx, ry] = rotate([x - cx, y - cy], -self.radians);
        [rx + w * 0.5, ry + h * 0.5]
    }

    /// Returns the axis-aligned rectangle enclosing all 4 corners.
    pub fn bounding_rect(&self) -> Rect {
        let [w, h] = [self.rect.width(), self.rect.height()];
        let corners = [[0.0, 0.0], [w, 0.0], [w, h], [0.0, h]].map(|p| self.transform_out(p));
        Rect::bounding(corners).unwrap_or(self.rect)
    }
}

impl From<Rect> for RotatedRect {
    fn from(rect: Rect) -> Self {
        Self::new(rect, 0.0)
    }
}

/// Rotates `p` around the origin, clockwise on screen.
fn rotate([x, y]: [f32; 2], radians: f32) -> [f32; 2] {
    let (sin, cos) = radians.sin_cos();
    [x * cos - y * sin, x * sin + y * cos]
}

/// Returns the clockwise rotation that turns an upright hand (fingers pointing up) into one whose
/// wrist is at `wrist` and whose middle finger base is at `finger`.
pub fn hand_rotation(wrist: [f32; 2], finger: [f32; 2]) -> f32 {
    let rel = [wrist[0] - finger[0], wrist[1] - finger[1]];
    (-rel[0]).atan2(rel[1])
}
