//! World-space positions and chunk region coordinates.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A position in world space, in blocks.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Vec3 {
    /// East/west.
    pub x: f32,
    /// Up/down.
    pub y: f32,
    /// North/south.
    pub z: f32,
}

impl Vec3 {
    /// Creates a position.
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Encodes this position as a `{x, y, z}` record.
    #[must_use]
    pub fn to_value(self) -> Value {
        Value::record([
            ("x", Value::from(self.x)),
            ("y", Value::from(self.y)),
            ("z", Value::from(self.z)),
        ])
    }

    /// Decodes a `{x, y, z}` record. Missing or non-numeric fields yield `None`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            x: value.field("x")?.as_number()? as f32,
            y: value.field("y")?.as_number()? as f32,
            z: value.field("z")?.as_number()? as f32,
        })
    }
}

/// Dimensions of a chunk region, in blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegionSize {
    /// Width along x.
    pub x: u32,
    /// Height along y.
    pub y: u32,
    /// Depth along z.
    pub z: u32,
}

impl RegionSize {
    /// Creates a region size. Zero dimensions are clamped to 1.
    #[must_use]
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self {
            x: if x == 0 { 1 } else { x },
            y: if y == 0 { 1 } else { y },
            z: if z == 0 { 1 } else { z },
        }
    }

    /// Number of blocks in one region.
    #[must_use]
    pub const fn volume(self) -> usize {
        self.x as usize * self.y as usize * self.z as usize
    }

    /// Returns the region containing a world position.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn region_of(self, position: Vec3) -> RegionPos {
        RegionPos::new(
            (position.x / self.x as f32).floor() as i32,
            (position.y / self.y as f32).floor() as i32,
            (position.z / self.z as f32).floor() as i32,
        )
    }
}

impl Default for RegionSize {
    fn default() -> Self {
        Self::new(32, 64, 32)
    }
}

/// Coordinate of a chunk region.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegionPos {
    /// Region x.
    pub x: i32,
    /// Region y.
    pub y: i32,
    /// Region z.
    pub z: i32,
}

impl RegionPos {
    /// Creates a region coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Debug for RegionPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Inclusive axis-aligned box of regions.
///
/// An empty box has `min > max` on some axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionBox {
    /// Lowest corner, inclusive.
    pub min: RegionPos,
    /// Highest corner, inclusive.
    pub max: RegionPos,
}

impl RegionBox {
    /// Creates a box from inclusive corners.
    #[must_use]
    pub const fn new(min: RegionPos, max: RegionPos) -> Self {
        Self { min, max }
    }

    /// The box centred on `center` extending `horizontal` regions along x and z and
    /// `vertical` regions along y. Both radii are inclusive. Corners saturate at
    /// the ends of the coordinate range.
    #[must_use]
    pub fn around(center: RegionPos, horizontal: u32, vertical: u32) -> Self {
        let h = i32::try_from(horizontal).unwrap_or(i32::MAX);
        let v = i32::try_from(vertical).unwrap_or(i32::MAX);
        Self {
            min: RegionPos::new(
                center.x.saturating_sub(h),
                center.y.saturating_sub(v),
                center.z.saturating_sub(h),
            ),
            max: RegionPos::new(
                center.x.saturating_add(h),
                center.y.saturating_add(v),
                center.z.saturating_add(h),
            ),
        }
    }

    /// Returns true if the box contains no regions.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Number of regions in the box, saturating at `usize::MAX`.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let span = |lo: i32, hi: i32| {
            usize::try_from(i64::from(hi) - i64::from(lo) + 1).unwrap_or(usize::MAX)
        };
        span(self.min.x, self.max.x)
            .saturating_mul(span(self.min.y, self.max.y))
            .saturating_mul(span(self.min.z, self.max.z))
    }

    /// Returns true if `pos` lies inside the box.
    #[must_use]
    pub const fn contains(&self, pos: RegionPos) -> bool {
        pos.x >= self.min.x
            && pos.x <= self.max.x
            && pos.y >= self.min.y
            && pos.y <= self.max.y
            && pos.z >= self.min.z
            && pos.z <= self.max.z
    }

    /// Intersection of two boxes (possibly empty).
    #[must_use]
    pub fn intersection(&self, other: &RegionBox) -> RegionBox {
        RegionBox {
            min: RegionPos::new(
                self.min.x.max(other.min.x),
                self.min.y.max(other.min.y),
                self.min.z.max(other.min.z),
            ),
            max: RegionPos::new(
                self.max.x.min(other.max.x),
                self.max.y.min(other.max.y),
                self.max.z.min(other.max.z),
            ),
        }
    }

    /// Splits `self \ other` into at most six disjoint boxes.
    ///
    /// Cost is proportional to the regions returned, not to the size of either box,
    /// which keeps small movements cheap.
    #[must_use]
    pub fn difference(&self, other: &RegionBox) -> Vec<RegionBox> {
        if self.is_empty() {
            return Vec::new();
        }
        let overlap = self.intersection(other);
        if overlap.is_empty() {
            return vec![*self];
        }

        let mut parts = Vec::with_capacity(6);
        let mut rest = *self;

        // Slice off the slabs outside the overlap, one axis at a time.
        if rest.min.x < overlap.min.x {
            parts.push(RegionBox::new(
                rest.min,
                RegionPos::new(overlap.min.x - 1, rest.max.y, rest.max.z),
            ));
            rest.min.x = overlap.min.x;
        }
        if rest.max.x > overlap.max.x {
            parts.push(RegionBox::new(
                RegionPos::new(overlap.max.x + 1, rest.min.y, rest.min.z),
                rest.max,
            ));
            rest.max.x = overlap.max.x;
        }
        if rest.min.y < overlap.min.y {
            parts.push(RegionBox::new(
                rest.min,
                RegionPos::new(rest.max.x, overlap.min.y - 1, rest.max.z),
            ));
            rest.min.y = overlap.min.y;
        }
        if rest.max.y > overlap.max.y {
            parts.push(RegionBox::new(
                RegionPos::new(rest.min.x, overlap.max.y + 1, rest.min.z),
                rest.max,
            ));
            rest.max.y = overlap.max.y;
        }
        if rest.min.z < overlap.min.z {
            parts.push(RegionBox::new(
                rest.min,
                RegionPos::new(rest.max.x, rest.max.y, overlap.min.z - 1),
            ));
            rest.min.z = overlap.min.z;
        }
        if rest.max.z > overlap.max.z {
            parts.push(RegionBox::new(
                RegionPos::new(rest.min.x, rest.min.y, overlap.max.z + 1),
                rest.max,
            ));
        }

        parts
    }

    /// Iterates every region in the box, x fastest.
    pub fn iter(&self) -> impl Iterator<Item = RegionPos> + use<> {
        let b = *self;
        (b.min.z..=b.max.z)
            .flat_map(move |z| (b.min.y..=b.max.y).map(move |y| (y, z)))
            .flat_map(move |(y, z)| (b.min.x..=b.max.x).map(move |x| RegionPos::new(x, y, z)))
    }
}
