//! Math types and glam re-exports.
//!
//! We re-export [glam](https://docs.rs/glam) types so users don't need to
//! depend on it directly. [`Transform2d`] is the local transform component
//! (position, rotation, scale and origin), [`Rect`] is the axis-aligned box
//! used by the spatial index.

pub use glam::{Affine2, Mat2, Vec2};

/// Dirty bit: position or origin changed (translation column only).
pub(crate) const DIRTY_TRANSLATION: u8 = 0b01;
/// Dirty bit: rotation or scale changed (linear part must be rebuilt).
pub(crate) const DIRTY_LINEAR: u8 = 0b10;

/// A 2D local transform: position, rotation, scale and origin.
///
/// The origin is the pivot point in local space: rotation and scale are
/// applied around it, and it is the point placed at `position`.
///
/// Fields are private so every mutation goes through a setter that records
/// which part of the matrix went stale. The cached local matrix is rebuilt
/// lazily by [`local_matrix`](Transform2d::local_matrix), and only the stale
/// part is recomputed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform2d {
    position: Vec2,
    rotation: f32,
    scale: Vec2,
    origin: Vec2,
    local: Affine2,
    dirty: u8,
}

impl Transform2d {
    /// Identity transform (origin, no rotation, uniform scale of 1).
    pub const IDENTITY: Self = Self {
        position: Vec2::ZERO,
        rotation: 0.0,
        scale: Vec2::ONE,
        origin: Vec2::ZERO,
        local: Affine2::IDENTITY,
        dirty: 0,
    };

    /// Create a transform at the given position.
    pub fn from_xy(x: f32, y: f32) -> Self {
        Self::from_position(Vec2::new(x, y))
    }

    pub fn from_position(position: Vec2) -> Self {
        let mut t = Self::IDENTITY;
        t.set_position(position);
        t
    }

    /// Return a copy with the given rotation (radians).
    pub fn with_rotation(mut self, radians: f32) -> Self {
        self.set_rotation(radians);
        self
    }

    /// Return a copy with uniform scale applied.
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.set_scale(Vec2::splat(scale));
        self
    }

    pub fn with_origin(mut self, origin: Vec2) -> Self {
        self.set_origin(origin);
        self
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn scale(&self) -> Vec2 {
        self.scale
    }

    pub fn origin(&self) -> Vec2 {
        self.origin
    }

    pub fn set_position(&mut self, position: Vec2) {
        self.position = position;
        self.dirty |= DIRTY_TRANSLATION;
    }

    /// Move by `delta` in parent space.
    pub fn translate(&mut self, delta: Vec2) {
        self.set_position(self.position + delta);
    }

    pub fn set_rotation(&mut self, radians: f32) {
        self.rotation = radians;
        self.dirty |= DIRTY_LINEAR;
    }

    pub fn rotate(&mut self, radians: f32) {
        self.set_rotation(self.rotation + radians);
    }

    pub fn set_scale(&mut self, scale: Vec2) {
        self.scale = scale;
        self.dirty |= DIRTY_LINEAR;
    }

    pub fn set_origin(&mut self, origin: Vec2) {
        self.origin = origin;
        self.dirty |= DIRTY_TRANSLATION;
    }

    /// Whether any setter ran since the local matrix was last rebuilt.
    pub fn is_dirty(&self) -> bool {
        self.dirty != 0
    }

    #[cfg(test)]
    pub(crate) fn dirty_bits(&self) -> u8 {
        self.dirty
    }

    /// Rebuild the stale parts of the cached local matrix and return it.
    pub fn local_matrix(&mut self) -> Affine2 {
        if self.dirty & DIRTY_LINEAR != 0 {
            self.local.matrix2 = Mat2::from_scale_angle(self.scale, self.rotation);
        }
        if self.dirty != 0 {
            self.local.translation = self.position - self.local.matrix2 * self.origin;
            self.dirty = 0;
        }
        self.local
    }

    /// Compute the local matrix from scratch without touching the cache.
    pub fn compute_matrix(&self) -> Affine2 {
        let linear = Mat2::from_scale_angle(self.scale, self.rotation);
        Affine2::from_mat2_translation(linear, self.position - linear * self.origin)
    }
}

impl Default for Transform2d {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// An axis-aligned rectangle in world units.
///
/// Edges are inclusive: two rectangles that share an edge overlap, and a point
/// on the boundary is contained.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    /// A rectangle that contains nothing; the identity for [`union`](Rect::union).
    pub const EMPTY: Self = Self {
        min: Vec2::splat(f32::INFINITY),
        max: Vec2::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Build from a top-left corner and a size.
    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            min: Vec2::new(x, y),
            max: Vec2::new(x + w, y + h),
        }
    }

    pub fn from_center_half_extents(center: Vec2, half_extents: Vec2) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec2 {
        (self.max - self.min) * 0.5
    }

    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    /// True for [`Rect::EMPTY`] and any inverted rectangle.
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn contains_point(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.min.x >= self.min.x
            && other.max.x <= self.max.x
            && other.min.y >= self.min.y
            && other.max.y <= self.max.y
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Grow by `margin` on every side.
    pub fn inflate(&self, margin: f32) -> Rect {
        Rect {
            min: self.min - Vec2::splat(margin),
            max: self.max + Vec2::splat(margin),
        }
    }

    /// The bounding box of this rectangle after an affine transform.
    pub fn transformed(&self, m: &Affine2) -> Rect {
        let corners = [
            self.min,
            Vec2::new(self.max.x, self.min.y),
            self.max,
            Vec2::new(self.min.x, self.max.y),
        ];
        corners.iter().fold(Rect::EMPTY, |acc, &c| {
            let p = m.transform_point2(c);
            Rect {
                min: acc.min.min(p),
                max: acc.max.max(p),
            }
        })
    }
}
