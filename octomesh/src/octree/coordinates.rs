//! Integer addressing of octree cubes
use super::types::{Corner, Side};
use crate::geom::{self, BoundBox, Point};
use serde::{Deserialize, Serialize};

/// Deepest level a cube may reach
///
/// Morton keys interleave three coordinates of this many bits, so they fit in
/// a `u64`.
pub const MAX_LEVEL: u8 = 20;

/// The physical box in which all cube coordinates are resolved
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RootBox {
    /// Bounds of the root cube
    pub bb: BoundBox,
    /// In quadtree mode every cube spans the full `z` range of the root
    pub quadtree: bool,
}

impl RootBox {
    /// Builds a new root box
    pub fn new(bb: BoundBox, quadtree: bool) -> Self {
        Self { bb, quadtree }
    }
}

/// Address of a cube in the virtual `2^level` grid of the root box
///
/// A cube at `level` covers `[pos · 2^(MAX_LEVEL - level), (pos + 1) ·
/// 2^(MAX_LEVEL - level))` in units of the finest grid.  Positions may be
/// negative or too large when describing the space around the root box;
/// such coordinates fail [`is_valid`](Self::is_valid).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CubeCoordinates {
    pos: [i64; 3],
    level: u8,
}

impl CubeCoordinates {
    /// Builds new coordinates
    pub fn new(x: i64, y: i64, z: i64, level: u8) -> Self {
        debug_assert!(level <= MAX_LEVEL);
        Self {
            pos: [x, y, z],
            level,
        }
    }

    /// Returns the coordinates of the root cube
    pub fn root() -> Self {
        Self::new(0, 0, 0, 0)
    }

    /// Returns the integer position at this cube's level
    pub fn pos(&self) -> [i64; 3] {
        self.pos
    }

    /// Returns the refinement level
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Returns the child at the given position (see [`Corner`])
    pub fn refine_for_position(&self, i: Corner) -> Self {
        let o = i.offset();
        Self::new(
            self.pos[0] * 2 + o[0],
            self.pos[1] * 2 + o[1],
            self.pos[2] * 2 + o[2],
            self.level + 1,
        )
    }

    /// Returns the ancestor `d` levels up
    pub fn reduce_level_by(&self, d: u8) -> Self {
        let d = d.min(self.level);
        Self::new(
            self.pos[0] >> d,
            self.pos[1] >> d,
            self.pos[2] >> d,
            self.level - d,
        )
    }

    /// Returns the ancestor at the given level (or `self` if shallower)
    pub fn reduce_to_level(&self, l: u8) -> Self {
        self.reduce_level_by(self.level.saturating_sub(l))
    }

    /// Returns the position of this cube within its parent
    pub fn child_position(&self) -> Corner {
        Corner::new(
            ((self.pos[0] & 1) | ((self.pos[1] & 1) << 1) | ((self.pos[2] & 1) << 2))
                as u8,
        )
    }

    /// Checks whether these coordinates lie within the root cube
    pub fn is_valid(&self, quadtree: bool) -> bool {
        let n = 1i64 << self.level;
        let in_range = |v: i64| (0..n).contains(&v);
        self.level <= MAX_LEVEL
            && in_range(self.pos[0])
            && in_range(self.pos[1])
            && if quadtree { self.pos[2] == 0 } else { in_range(self.pos[2]) }
    }

    /// Returns coordinates shifted by an integer offset at the same level
    pub fn shifted(&self, d: [i64; 3]) -> Self {
        Self::new(
            self.pos[0] + d[0],
            self.pos[1] + d[1],
            self.pos[2] + d[2],
            self.level,
        )
    }

    /// Returns the same-level neighbour across the given side
    pub fn neighbour(&self, side: Side) -> Self {
        self.shifted(side.step())
    }

    /// Returns the range covered at the finest level, `[lo, hi)` per axis
    pub fn finest_range(&self) -> ([i64; 3], [i64; 3]) {
        let s = (MAX_LEVEL - self.level) as u32;
        (
            self.pos.map(|p| p << s),
            self.pos.map(|p| (p + 1) << s),
        )
    }

    /// Checks whether `other` is this cube or one of its descendants
    pub fn contains(&self, other: &Self) -> bool {
        other.level >= self.level && other.reduce_to_level(self.level) == *self
    }

    /// Checks whether the closed cubes share at least one point
    pub fn touches(&self, other: &Self) -> bool {
        let (alo, ahi) = self.finest_range();
        let (blo, bhi) = other.finest_range();
        (0..3).all(|i| alo[i] <= bhi[i] && blo[i] <= ahi[i])
    }

    /// Checks whether the cubes share a face of non-zero area
    ///
    /// With `quadtree` set, sides normal to `z` are ignored.
    pub fn shares_face(&self, other: &Self, quadtree: bool) -> bool {
        let (alo, ahi) = self.finest_range();
        let (blo, bhi) = other.finest_range();
        let mut touching = 0;
        for i in 0..3 {
            if quadtree && i == 2 {
                continue;
            }
            if ahi[i] == blo[i] || bhi[i] == alo[i] {
                touching += 1;
            } else if !(alo[i] < bhi[i] && blo[i] < ahi[i]) {
                return false;
            }
        }
        touching == 1
    }

    /// Returns the Morton (Z-order) key of the cube's first finest descendant
    ///
    /// Bits are interleaved `z y x` from most to least significant within
    /// each level, so children sort in [`Corner`] order.
    pub fn morton_key(&self) -> u64 {
        let (lo, _) = self.finest_range();
        let mut key = 0u64;
        for b in (0..MAX_LEVEL as u32).rev() {
            for p in lo.iter().rev() {
                key = (key << 1) | ((*p as u64 >> b) & 1);
            }
        }
        key
    }

    /// Returns the bounds of this cube in physical space
    pub fn bounding_box(&self, root: &RootBox) -> BoundBox {
        let n = (1u64 << self.level) as f64;
        let size = root.bb.span() / n;
        let mut min = Point::zeros();
        let mut max = Point::zeros();
        for i in 0..3 {
            if root.quadtree && i == 2 {
                min[i] = root.bb.min[i];
                max[i] = root.bb.max[i];
            } else {
                min[i] = root.bb.min[i] + size[i] * self.pos[i] as f64;
                max[i] = min[i] + size[i];
            }
        }
        BoundBox::new(min, max)
    }

    /// Returns the eight cube vertices, indexed by [`Corner`]
    pub fn vertices(&self, root: &RootBox) -> [Point; 8] {
        let bb = self.bounding_box(root);
        std::array::from_fn(|i| {
            let o = Corner::new(i as u8).offset();
            Point::new(
                if o[0] == 1 { bb.max.x } else { bb.min.x },
                if o[1] == 1 { bb.max.y } else { bb.min.y },
                if o[2] == 1 { bb.max.z } else { bb.min.z },
            )
        })
    }

    /// Returns the cube centre
    pub fn centre(&self, root: &RootBox) -> Point {
        self.bounding_box(root).centre()
    }

    /// Returns the edge length of the cube (along `x`)
    pub fn size(&self, root: &RootBox) -> f64 {
        root.bb.span().x / (1u64 << self.level) as f64
    }

    /// Fast conservative triangle test, based on bounding boxes only
    pub fn intersects_triangle(&self, root: &RootBox, a: &Point, b: &Point, c: &Point) -> bool {
        let bb = self.bounding_box(root);
        let tol = self.size(root) * 1e-9;
        bb.inflate(tol).overlaps(&BoundBox::from_points([a, b, c]))
    }

    /// Exact triangle test (separating axes)
    ///
    /// Triangles touching the cube count as intersecting.
    pub fn intersects_triangle_exact(
        &self,
        root: &RootBox,
        a: &Point,
        b: &Point,
        c: &Point,
    ) -> bool {
        let bb = self.bounding_box(root);
        let tol = self.size(root) * 1e-9;
        geom::triangle_box_overlap(&bb, tol, a, b, c)
    }

    /// Checks whether a point lies in the closed cube
    pub fn is_vertex_inside(&self, root: &RootBox, p: &Point) -> bool {
        self.bounding_box(root).contains(p)
    }

    /// Checks whether a segment intersects the closed cube
    pub fn intersects_line(&self, root: &RootBox, a: &Point, b: &Point) -> bool {
        let tol = self.size(root) * 1e-9;
        geom::segment_box_overlap(&self.bounding_box(root), tol, a, b)
    }
}

impl Ord for CubeCoordinates {
    /// Morton order, with ancestors sorted before their descendants
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.morton_key()
            .cmp(&other.morton_key())
            .then(self.level.cmp(&other.level))
    }
}

impl PartialOrd for CubeCoordinates {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
