//! Local neighbourhoods of a single free vertex
use crate::geom::{self, Point};

/// Ring of tetrahedra around one free vertex
///
/// The free vertex is the last point; every tetrahedron is
/// `[a, b, c, free]` and is valid when its volume is positive, i.e. when the
/// free vertex lies on the positive side of the plane through `a`, `b`,
/// `c`.  Moving the free vertex changes each volume linearly, which is what
/// the smoothers rely on.
#[derive(Clone, Debug, PartialEq)]
pub struct TetSimplex {
    /// Ring points followed by the free vertex
    pub points: Vec<Point>,
    /// Tetrahedra; the fourth index is always the free vertex
    pub tets: Vec<[usize; 4]>,
}

impl TetSimplex {
    /// Builds a simplex from ring points, the free vertex and triangles
    /// `[a, b, c]` seen counter-clockwise from the free vertex's side
    pub fn new(mut ring: Vec<Point>, free: Point, bases: &[[usize; 3]]) -> Self {
        let f = ring.len();
        ring.push(free);
        Self {
            points: ring,
            tets: bases.iter().map(|[a, b, c]| [*a, *b, *c, f]).collect(),
        }
    }

    /// Returns the index of the free vertex
    pub fn free(&self) -> usize {
        self.points.len() - 1
    }

    /// Returns the position of the free vertex
    pub fn position(&self) -> Point {
        self.points[self.free()]
    }

    /// Moves the free vertex
    pub fn set_position(&mut self, p: Point) {
        let f = self.free();
        self.points[f] = p;
    }

    /// Returns the gradient and offset of each tetrahedron volume as a
    /// function of the free vertex position: `V(x) = n · x + d`
    pub fn volume_planes(&self) -> Vec<(Point, f64)> {
        self.tets
            .iter()
            .map(|t| {
                let [a, b, c] = [t[0], t[1], t[2]].map(|i| self.points[i]);
                let n = (b - a).cross(&(c - a)) / 6.0;
                (n, -n.dot(&a))
            })
            .collect()
    }

    /// Returns the signed volume of every tetrahedron at position `x`
    pub fn volumes_at(&self, x: &Point) -> Vec<f64> {
        self.tets
            .iter()
            .map(|t| {
                let [a, b, c] = [t[0], t[1], t[2]].map(|i| self.points[i]);
                geom::tet_volume(&a, &b, &c, x)
            })
            .collect()
    }

    /// Returns the smallest tetrahedron quality at position `x`
    pub fn min_quality_at(&self, x: &Point) -> f64 {
        self.tets
            .iter()
            .map(|t| {
                let [a, b, c] = [t[0], t[1], t[2]].map(|i| self.points[i]);
                tet_quality(&a, &b, &c, x)
            })
            .fold(f64::INFINITY, f64::min)
    }

    /// Checks whether every tetrahedron has a positive volume at `x`
    pub fn is_valid_at(&self, x: &Point) -> bool {
        self.volumes_at(x).iter().all(|v| *v > 0.0)
    }

    /// Returns the average distance from the free vertex to the ring
    pub fn length_scale(&self) -> f64 {
        let f = self.free();
        let n = f.max(1) as f64;
        self.points[..f]
            .iter()
            .map(|p| (p - self.points[f]).norm())
            .sum::<f64>()
            / n
    }

    /// Returns the bounding box of the ring and the free vertex
    pub fn bounds(&self) -> geom::BoundBox {
        geom::BoundBox::from_points(&self.points)
    }
}

/// Ring of triangles around one free vertex on a surface
///
/// Points are 2D coordinates in the tangent plane of the free vertex, which
/// is the last point.  Every triangle is `[a, b, free]`, valid when it is
/// counter-clockwise.
#[derive(Clone, Debug, PartialEq)]
pub struct TriSimplex {
    /// Ring points followed by the free vertex
    pub points: Vec<[f64; 2]>,
    /// Triangles; the third index is always the free vertex
    pub triangles: Vec<[usize; 3]>,
}

impl TriSimplex {
    /// Returns the index of the free vertex
    pub fn free(&self) -> usize {
        self.points.len() - 1
    }

    /// Returns the signed area of every triangle with the free vertex at
    /// `x`
    pub fn areas_at(&self, x: [f64; 2]) -> Vec<f64> {
        self.triangles
            .iter()
            .map(|[a, b, _]| {
                let (a, b) = (self.points[*a], self.points[*b]);
                0.5 * ((b[0] - a[0]) * (x[1] - a[1]) - (b[1] - a[1]) * (x[0] - a[0]))
            })
            .collect()
    }

    /// Returns the gradient of every triangle area with respect to the free
    /// vertex
    pub fn area_gradients(&self) -> Vec<[f64; 2]> {
        self.triangles
            .iter()
            .map(|[a, b, _]| {
                let (a, b) = (self.points[*a], self.points[*b]);
                [-0.5 * (b[1] - a[1]), 0.5 * (b[0] - a[0])]
            })
            .collect()
    }
}

/// Returns the mean-ratio quality of a tetrahedron
///
/// The quality is 1 for a regular tetrahedron, drops towards 0 as it
/// degenerates and is negative for inverted tetrahedra.
pub fn tet_quality(a: &Point, b: &Point, c: &Point, d: &Point) -> f64 {
    let v = geom::tet_volume(a, b, c, d);
    let l2 = (b - a).norm_squared()
        + (c - a).norm_squared()
        + (d - a).norm_squared()
        + (c - b).norm_squared()
        + (d - b).norm_squared()
        + (d - c).norm_squared();
    if l2 <= f64::MIN_POSITIVE {
        return 0.0;
    }
    12.0 * (3.0 * v.abs()).powf(2.0 / 3.0) / l2 * v.signum()
}
