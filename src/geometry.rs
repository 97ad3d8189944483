//! Geometry primitives shared by the scene graph, outputs and input
//!
//! Rectangles are integer, in either global layout or output-local
//! coordinates. Points and transforms are floating point.

/// An axis-aligned rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    /// Create a new rectangle
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle spanning `x1..x2`, `y1..y2`; sizes saturate at `i32::MAX`
    pub fn from_edges(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        let span = |a: i32, b: i32| {
            (b as i64 - a as i64).clamp(i32::MIN as i64, i32::MAX as i64) as i32
        };
        Rect::new(x1, y1, span(x1, x2), span(y1, y2))
    }

    /// A rectangle with no area
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Exclusive right edge, saturating at `i32::MAX`
    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    /// Exclusive bottom edge, saturating at `i32::MAX`
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    /// Intersection of two rectangles, `None` when they do not overlap
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        let rect = Rect::from_edges(x1, y1, x2, y2);
        (!rect.is_empty()).then_some(rect)
    }

    /// Check whether two rectangles overlap
    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersection(other).is_some()
    }

    /// Smallest rectangle containing both
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = self.right().max(other.right());
        let y2 = self.bottom().max(other.bottom());
        Rect::from_edges(x1, y1, x2, y2)
    }

    /// Check whether `other` lies entirely inside this rectangle
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Check whether a point lies inside (right/bottom edges excluded)
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x as f64
            && point.y >= self.y as f64
            && point.x < self.right() as f64
            && point.y < self.bottom() as f64
    }

    /// Move the rectangle by an offset
    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.width,
            self.height,
        )
    }
}

/// A point in floating point coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Position and uniform scale of a node relative to its parent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub x: f64,
    pub y: f64,
    pub scale: f64,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        x: 0.0,
        y: 0.0,
        scale: 1.0,
    };

    /// A pure translation
    pub const fn at(x: f64, y: f64) -> Self {
        Self { x, y, scale: 1.0 }
    }

    /// Compose with a child transform expressed in this transform's space
    pub fn then(&self, child: &Transform) -> Transform {
        Transform {
            x: self.x + self.scale * child.x,
            y: self.y + self.scale * child.y,
            scale: self.scale * child.scale,
        }
    }

    /// Map a local point to the parent space
    pub fn apply(&self, point: Point) -> Point {
        Point::new(
            self.x + self.scale * point.x,
            self.y + self.scale * point.y,
        )
    }

    /// Map a parent-space point back to local coordinates
    pub fn invert(&self, point: Point) -> Point {
        if self.scale == 0.0 {
            return Point::default();
        }
        Point::new(
            (point.x - self.x) / self.scale,
            (point.y - self.y) / self.scale,
        )
    }

    /// Bounds of a `width` x `height` local area once transformed
    pub fn map_size(&self, width: i32, height: i32) -> Rect {
        let x1 = self.x.floor();
        let y1 = self.y.floor();
        let x2 = (self.x + self.scale * width as f64).ceil();
        let y2 = (self.y + self.scale * height as f64).ceil();
        Rect::new(x1 as i32, y1 as i32, (x2 - x1) as i32, (y2 - y1) as i32)
    }

    /// Map a local rectangle to the parent space, rounding outwards
    pub fn map_rect(&self, rect: &Rect) -> Rect {
        let origin = self.apply(Point::new(rect.x as f64, rect.y as f64));
        Transform {
            x: origin.x,
            y: origin.y,
            scale: self.scale,
        }
        .map_size(rect.width, rect.height)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A region built from added and subtracted rectangles
///
/// Later operations win: a point is inside when the last rectangle
/// containing it was added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Region {
    rects: Vec<(Rect, bool)>,
}

impl Region {
    /// Create a new empty region
    pub fn new() -> Self {
        Self { rects: Vec::new() }
    }

    /// Add a rectangle to the region
    pub fn add(&mut self, rect: Rect) {
        self.rects.push((rect, true));
    }

    /// Subtract a rectangle from the region
    pub fn subtract(&mut self, rect: Rect) {
        self.rects.push((rect, false));
    }

    /// Check if a point is inside the region
    pub fn contains(&self, point: Point) -> bool {
        self.rects
            .iter()
            .rev()
            .find(|(rect, _)| rect.contains(point))
            .map(|(_, add)| *add)
            .unwrap_or(false)
    }

    /// Check if the region is empty
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }
}
