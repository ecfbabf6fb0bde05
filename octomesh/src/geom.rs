//! Small geometric primitives shared by every stage
use serde::{Deserialize, Serialize};

/// A position (or direction) in 3D space
pub type Point = nalgebra::Vector3<f64>;

/// Axis-aligned bounding box
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundBox {
    /// Lower corner
    pub min: Point,
    /// Upper corner
    pub max: Point,
}

impl BoundBox {
    /// Builds a new bounding box from its corners
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// Returns an inverted (empty) box, ready to be grown with [`extend`]
    ///
    /// [`extend`]: BoundBox::extend
    pub fn empty() -> Self {
        Self {
            min: Point::repeat(f64::INFINITY),
            max: Point::repeat(f64::NEG_INFINITY),
        }
    }

    /// Builds the tightest box around a set of points
    pub fn from_points<'a, I: IntoIterator<Item = &'a Point>>(pts: I) -> Self {
        let mut out = Self::empty();
        for p in pts {
            out.extend(p);
        }
        out
    }

    /// Grows the box to contain the given point
    pub fn extend(&mut self, p: &Point) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    /// Checks whether the box has been grown at least once
    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    /// Returns the box centre
    pub fn centre(&self) -> Point {
        (self.min + self.max) * 0.5
    }

    /// Returns the box extent on each axis
    pub fn span(&self) -> Point {
        self.max - self.min
    }

    /// Returns the smallest cube sharing this box's centre that contains it
    pub fn cube(&self) -> Self {
        let c = self.centre();
        let h = self.span().max() * 0.5;
        Self::new(c - Point::repeat(h), c + Point::repeat(h))
    }

    /// Returns a copy of the box grown by `d` in every direction
    pub fn inflate(&self, d: f64) -> Self {
        Self::new(self.min - Point::repeat(d), self.max + Point::repeat(d))
    }

    /// Checks whether a point lies in the (closed) box
    pub fn contains(&self, p: &Point) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    /// Checks whether two (closed) boxes overlap
    pub fn overlaps(&self, other: &BoundBox) -> bool {
        (0..3).all(|i| self.min[i] <= other.max[i] && other.min[i] <= self.max[i])
    }

    /// Squared distance from a point to the box (zero inside)
    pub fn distance_squared(&self, p: &Point) -> f64 {
        let mut d = 0.0;
        for i in 0..3 {
            let v = if p[i] < self.min[i] {
                self.min[i] - p[i]
            } else if p[i] > self.max[i] {
                p[i] - self.max[i]
            } else {
                0.0
            };
            d += v * v;
        }
        d
    }
}

/// A plane through `origin` with the given normal
#[derive(Copy, Clone, Debug)]
pub struct Plane {
    /// Any point on the plane
    pub origin: Point,
    /// Unit normal
    pub normal: Point,
}

impl Plane {
    /// Builds a plane, normalizing the normal vector
    pub fn new(origin: Point, normal: Point) -> Self {
        let n = normal.norm();
        let normal = if n > f64::MIN_POSITIVE { normal / n } else { normal };
        Self { origin, normal }
    }

    /// Signed distance from the plane, positive on the normal's side
    pub fn distance(&self, p: &Point) -> f64 {
        self.normal.dot(&(p - self.origin))
    }

    /// Orthogonal projection of a point onto the plane
    pub fn project(&self, p: &Point) -> Point {
        p - self.normal * self.distance(p)
    }
}

/// Area-weighted normal of a triangle (length is twice the area)
pub fn triangle_normal(a: &Point, b: &Point, c: &Point) -> Point {
    (b - a).cross(&(c - a))
}

/// Area of a triangle
pub fn triangle_area(a: &Point, b: &Point, c: &Point) -> f64 {
    triangle_normal(a, b, c).norm() * 0.5
}

/// Signed volume of a tetrahedron
///
/// Positive when `d` lies on the side of `(a, b, c)` that the right-handed
/// normal of that triangle points to.
pub fn tet_volume(a: &Point, b: &Point, c: &Point, d: &Point) -> f64 {
    (b - a).cross(&(c - a)).dot(&(d - a)) / 6.0
}

/// Area-weighted normal and centre of a planar or warped polygon
///
/// The polygon is split into triangles fanned from its vertex average, so the
/// result is well-defined for non-planar faces too.
pub fn polygon_normal_and_centre(pts: &[Point]) -> (Point, Point) {
    debug_assert!(pts.len() >= 3);
    if pts.len() == 3 {
        let n = triangle_normal(&pts[0], &pts[1], &pts[2]) * 0.5;
        return (n, (pts[0] + pts[1] + pts[2]) / 3.0);
    }
    let avg = pts.iter().sum::<Point>() / pts.len() as f64;
    let mut normal = Point::zeros();
    let mut centre = Point::zeros();
    let mut area = 0.0;
    for i in 0..pts.len() {
        let a = &pts[i];
        let b = &pts[(i + 1) % pts.len()];
        let n = triangle_normal(a, b, &avg) * 0.5;
        let ta = n.norm();
        normal += n;
        centre += (a + b + avg) * (ta / 3.0);
        area += ta;
    }
    if area > f64::MIN_POSITIVE {
        (normal, centre / area)
    } else {
        (normal, avg)
    }
}

/// Classification of the closest feature of a triangle to a query point
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TriangleFeature {
    /// The nearest point is interior to the triangle
    Face,
    /// The nearest point lies on the edge starting at the given vertex
    Edge(u8),
    /// The nearest point is the given vertex
    Vertex(u8),
}

/// Returns the point of triangle `abc` nearest to `p`
///
/// The second value reports which triangle feature holds that point.
pub fn nearest_point_on_triangle(
    p: &Point,
    a: &Point,
    b: &Point,
    c: &Point,
) -> (Point, TriangleFeature) {
    // Voronoi-region walk from "Real-Time Collision Detection", 5.1.5
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (*a, TriangleFeature::Vertex(0));
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (*b, TriangleFeature::Vertex(1));
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (a + ab * v, TriangleFeature::Edge(0));
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (*c, TriangleFeature::Vertex(2));
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (a + ac * w, TriangleFeature::Edge(2));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * w, TriangleFeature::Edge(1));
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    (a + ab * v + ac * w, TriangleFeature::Face)
}

/// Returns the point of segment `ab` nearest to `p`
pub fn nearest_point_on_segment(p: &Point, a: &Point, b: &Point) -> Point {
    let d = b - a;
    let l2 = d.norm_squared();
    if l2 <= f64::MIN_POSITIVE {
        return *a;
    }
    let t = ((p - a).dot(&d) / l2).clamp(0.0, 1.0);
    a + d * t
}

/// Checks whether a triangle intersects a closed axis-aligned box
///
/// This is the separating-axis test of Akenine-Möller; `tol` grows the box
/// on every axis, so `tol = 0` treats touching as intersecting.
pub fn triangle_box_overlap(
    bb: &BoundBox,
    tol: f64,
    a: &Point,
    b: &Point,
    c: &Point,
) -> bool {
    let centre = bb.centre();
    let half = bb.span() * 0.5 + Point::repeat(tol);
    let v = [a - centre, b - centre, c - centre];

    // Box face normals
    for i in 0..3 {
        let lo = v[0][i].min(v[1][i]).min(v[2][i]);
        let hi = v[0][i].max(v[1][i]).max(v[2][i]);
        if lo > half[i] || hi < -half[i] {
            return false;
        }
    }

    // Triangle normal
    let e = [v[1] - v[0], v[2] - v[1], v[0] - v[2]];
    let n = e[0].cross(&e[1]);
    let r = half.x * n.x.abs() + half.y * n.y.abs() + half.z * n.z.abs();
    let s = n.dot(&v[0]);
    if s > r || s < -r {
        return false;
    }

    // Cross products of edges and box axes
    for edge in &e {
        for axis in 0..3 {
            let mut u = Point::zeros();
            u[axis] = 1.0;
            let a = u.cross(edge);
            if a.norm_squared() <= f64::MIN_POSITIVE {
                continue;
            }
            let p = [a.dot(&v[0]), a.dot(&v[1]), a.dot(&v[2])];
            let lo = p[0].min(p[1]).min(p[2]);
            let hi = p[0].max(p[1]).max(p[2]);
            let r = half.x * a.x.abs() + half.y * a.y.abs() + half.z * a.z.abs();
            if lo > r || hi < -r {
                return false;
            }
        }
    }
    true
}

/// Checks whether a segment intersects a closed axis-aligned box
///
/// Slab test; `tol` grows the box as in [`triangle_box_overlap`].
pub fn segment_box_overlap(bb: &BoundBox, tol: f64, a: &Point, b: &Point) -> bool {
    let bb = bb.inflate(tol);
    let d = b - a;
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    for i in 0..3 {
        if d[i].abs() <= f64::MIN_POSITIVE {
            if a[i] < bb.min[i] || a[i] > bb.max[i] {
                return false;
            }
        } else {
            let inv = 1.0 / d[i];
            let (mut lo, mut hi) = ((bb.min[i] - a[i]) * inv, (bb.max[i] - a[i]) * inv);
            if lo > hi {
                std::mem::swap(&mut lo, &mut hi);
            }
            t0 = t0.max(lo);
            t1 = t1.min(hi);
            if t0 > t1 {
                return false;
            }
        }
    }
    true
}

/// A 2×2 matrix stored row-major, used by the planar smoothers
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Matrix2D(pub [[f64; 2]; 2]);

impl Matrix2D {
    /// Returns the determinant
    pub fn determinant(&self) -> f64 {
        let m = &self.0;
        m[0][0] * m[1][1] - m[0][1] * m[1][0]
    }

    /// Solves `self * x = b` by Cramer's rule
    pub fn solve(&self, b: [f64; 2]) -> Result<[f64; 2], crate::Error> {
        let det = self.determinant();
        if det.abs() <= f64::MIN_POSITIVE {
            return Err(crate::Error::SingularMatrix("2x2 system"));
        }
        let m = &self.0;
        Ok([
            (b[0] * m[1][1] - m[0][1] * b[1]) / det,
            (m[0][0] * b[1] - b[0] * m[1][0]) / det,
        ])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn matrix2d_solve() {
        let m = Matrix2D([[2.0, 0.0], [0.0, 2.0]]);
        let x = m.solve([4.0, 6.0]).unwrap();
        assert_relative_eq!(x[0], 2.0);
        assert_relative_eq!(x[1], 3.0);
        assert!(Matrix2D([[1.0, 2.0], [2.0, 4.0]]).solve([1.0, 1.0]).is_err());
    }

    #[test]
    fn nearest_on_triangle() {
        let a = Point::new(0.0, 0.0, 0.0);
        let b = Point::new(1.0, 0.0, 0.0);
        let c = Point::new(0.0, 1.0, 0.0);
        let (p, f) = nearest_point_on_triangle(&Point::new(0.2, 0.2, 1.0), &a, &b, &c);
        assert_eq!(f, TriangleFeature::Face);
        assert_relative_eq!(p, Point::new(0.2, 0.2, 0.0));

        let (p, f) = nearest_point_on_triangle(&Point::new(-1.0, -1.0, 0.0), &a, &b, &c);
        assert_eq!(f, TriangleFeature::Vertex(0));
        assert_relative_eq!(p, a);

        let (p, f) = nearest_point_on_triangle(&Point::new(0.5, -1.0, 0.0), &a, &b, &c);
        assert_eq!(f, TriangleFeature::Edge(0));
        assert_relative_eq!(p, Point::new(0.5, 0.0, 0.0));
    }

    #[test]
    fn nearest_on_random_triangles() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let mut random = || {
            Point::new(
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-2.0..2.0),
            )
        };
        for _ in 0..200 {
            let (a, b, c, p) = (random(), random(), random(), random());
            let (q, _) = nearest_point_on_triangle(&p, &a, &b, &c);
            let d = (p - q).norm();
            const N: usize = 16;
            for i in 0..=N {
                for j in 0..=N - i {
                    let (u, v) = (i as f64 / N as f64, j as f64 / N as f64);
                    let s = a + (b - a) * u + (c - a) * v;
                    assert!(d <= (p - s).norm() + 1e-9);
                }
            }
        }
    }

    #[test]
    fn triangle_box() {
        let bb = BoundBox::new(Point::zeros(), Point::repeat(1.0));
        let a = Point::new(-1.0, 0.5, 0.5);
        let b = Point::new(2.0, 0.5, 0.5);
        let c = Point::new(0.5, 2.0, 0.5);
        assert!(triangle_box_overlap(&bb, 0.0, &a, &b, &c));

        // Touching a face counts as an intersection
        let a = Point::new(1.0, 0.0, 0.0);
        let b = Point::new(1.0, 1.0, 0.0);
        let c = Point::new(1.0, 0.0, 1.0);
        assert!(triangle_box_overlap(&bb, 0.0, &a, &b, &c));

        let shift = Point::new(0.01, 0.0, 0.0);
        assert!(!triangle_box_overlap(&bb, 0.0, &(a + shift), &(b + shift), &(c + shift)));
        assert!(triangle_box_overlap(&bb, 0.1, &(a + shift), &(b + shift), &(c + shift)));
    }

    #[test]
    fn tet_orientation() {
        let o = Point::zeros();
        let v = tet_volume(&o, &Point::x(), &Point::y(), &Point::z());
        assert_relative_eq!(v, 1.0 / 6.0);
        let v = tet_volume(&o, &Point::y(), &Point::x(), &Point::z());
        assert_relative_eq!(v, -1.0 / 6.0);
    }

    #[test]
    fn polygon_centre() {
        let pts = [
            Point::new(0.0, 0.0, 0.0),
            Point::new(2.0, 0.0, 0.0),
            Point::new(2.0, 2.0, 0.0),
            Point::new(0.0, 2.0, 0.0),
        ];
        let (n, c) = polygon_normal_and_centre(&pts);
        assert_relative_eq!(n, Point::new(0.0, 0.0, 4.0));
        assert_relative_eq!(c, Point::new(1.0, 1.0, 0.0));
    }
}
