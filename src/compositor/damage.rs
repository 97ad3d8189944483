//! Per-output damage tracking

use crate::geometry::Rect;

/// Above this many rectangles the region collapses to its bounding box
pub const MAX_DAMAGE_RECTS: usize = 20;

/// Rectangles pending redraw, in output-local coordinates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DamageRegion {
    rects: Vec<Rect>,
    bounds: Rect,
}

impl DamageRegion {
    /// Create an empty region clipped to `bounds`
    pub fn new(bounds: Rect) -> Self {
        Self {
            rects: Vec::new(),
            bounds,
        }
    }

    /// Add a rectangle, clipped to the bounds
    pub fn add(&mut self, rect: Rect) {
        let Some(rect) = rect.intersection(&self.bounds) else {
            return;
        };
        if self.rects.iter().any(|existing| existing.contains_rect(&rect)) {
            return;
        }
        self.rects.retain(|existing| !rect.contains_rect(existing));
        self.rects.push(rect);

        if self.rects.len() > MAX_DAMAGE_RECTS {
            let extents = self.extents();
            self.rects.clear();
            if let Some(extents) = extents {
                self.rects.push(extents);
            }
        }
    }

    /// Damage everything
    pub fn add_whole(&mut self) {
        self.rects.clear();
        if !self.bounds.is_empty() {
            self.rects.push(self.bounds);
        }
    }

    /// Merge rectangles taken from another region
    pub fn merge(&mut self, rects: &[Rect]) {
        for rect in rects {
            self.add(*rect);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    /// Bounding box of all damage
    pub fn extents(&self) -> Option<Rect> {
        self.rects
            .iter()
            .copied()
            .reduce(|acc, rect| acc.union(&rect))
    }

    /// Take the damage, leaving the region empty
    pub fn take(&mut self) -> Vec<Rect> {
        std::mem::take(&mut self.rects)
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Change the clip bounds, dropping damage outside them
    pub fn set_bounds(&mut self, bounds: Rect) {
        self.bounds = bounds;
        let rects = std::mem::take(&mut self.rects);
        self.merge(&rects);
    }
}
