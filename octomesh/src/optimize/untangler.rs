//! Feasible region of a free vertex, built by clipping a box with planes
use super::TetSimplex;
use crate::geom::{BoundBox, Point};

/// Convex polyhedron stored as a list of face polygons
#[derive(Clone, Debug)]
pub(crate) struct CutRegion {
    faces: Vec<Vec<Point>>,
    tol: f64,
}

impl CutRegion {
    /// Builds the region from a box
    pub fn new(bb: &BoundBox) -> Self {
        let corner = |i: usize| {
            Point::new(
                if i & 1 != 0 { bb.max.x } else { bb.min.x },
                if i & 2 != 0 { bb.max.y } else { bb.min.y },
                if i & 4 != 0 { bb.max.z } else { bb.min.z },
            )
        };
        let faces = [
            [0, 4, 6, 2],
            [1, 3, 7, 5],
            [0, 1, 5, 4],
            [2, 6, 7, 3],
            [0, 2, 3, 1],
            [4, 5, 7, 6],
        ]
        .iter()
        .map(|f| f.iter().map(|i| corner(*i)).collect())
        .collect();
        Self {
            faces,
            tol: 1e-12 * bb.span().norm().max(f64::MIN_POSITIVE),
        }
    }

    /// Checks whether anything with a volume is left
    pub fn is_empty(&self) -> bool {
        self.faces.len() < 4
    }

    /// Keeps the part where `n · x + d >= 0`
    pub fn plane_cut(&mut self, n: &Point, d: f64) {
        let len = n.norm();
        if len <= f64::MIN_POSITIVE {
            return;
        }
        let (n, d) = (n / len, d / len);
        let dist = |p: &Point| n.dot(p) + d;

        let mut cap: Vec<Point> = vec![];
        let mut faces = Vec::with_capacity(self.faces.len() + 1);
        for face in &self.faces {
            let mut out = vec![];
            for i in 0..face.len() {
                let (a, b) = (face[i], face[(i + 1) % face.len()]);
                let (da, db) = (dist(&a), dist(&b));
                if da >= -self.tol {
                    out.push(a);
                    if da.abs() <= self.tol {
                        cap.push(a);
                    }
                }
                if (da > self.tol && db < -self.tol) || (da < -self.tol && db > self.tol) {
                    let x = a + (b - a) * (da / (da - db));
                    out.push(x);
                    cap.push(x);
                }
            }
            dedup(&mut out, self.tol);
            if out.len() >= 3 {
                faces.push(out);
            }
        }
        dedup(&mut cap, self.tol);
        if cap.len() >= 3 {
            let c = cap.iter().sum::<Point>() / cap.len() as f64;
            let u = (cap[0] - c).normalize();
            let v = n.cross(&u);
            cap.sort_by(|a, b| {
                let ta = (a - c).dot(&v).atan2((a - c).dot(&u));
                let tb = (b - c).dot(&v).atan2((b - c).dot(&u));
                ta.total_cmp(&tb)
            });
            faces.push(cap);
        }
        self.faces = faces;
    }

    /// Returns the distinct corners of the region
    pub fn vertices(&self) -> Vec<Point> {
        let mut out: Vec<Point> = self.faces.iter().flatten().copied().collect();
        dedup(&mut out, self.tol);
        out
    }
}

/// Removes points closer than `tol` to an earlier point
fn dedup(points: &mut Vec<Point>, tol: f64) {
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    for p in points.drain(..) {
        if !out.iter().any(|q| (p - q).norm() <= tol) {
            out.push(p);
        }
    }
    *points = out;
}

/// Moves the free vertex into the centroid of its feasible region
///
/// Returns `false` without moving if the region is empty.
pub(crate) fn untangle(s: &mut TetSimplex) -> bool {
    let bb = s.bounds();
    let mut region = CutRegion::new(&bb.inflate(0.1 * bb.span().max()));
    for (n, d) in s.volume_planes() {
        region.plane_cut(&n, d);
        if region.is_empty() {
            return false;
        }
    }
    let vertices = region.vertices();
    if vertices.is_empty() {
        return false;
    }
    let c = vertices.iter().sum::<Point>() / vertices.len() as f64;
    if !s.is_valid_at(&c) {
        return false;
    }
    s.set_position(c);
    true
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::optimize::simplex::test::octahedron;
    use approx::assert_relative_eq;

    #[test]
    fn box_cut() {
        let mut r = CutRegion::new(&BoundBox::new(Point::zeros(), Point::repeat(1.0)));
        assert_eq!(r.vertices().len(), 8);
        // Keep x + y + z <= 1, leaving a tetrahedron
        r.plane_cut(&Point::repeat(-1.0), 1.0);
        assert!(!r.is_empty());
        let v = r.vertices();
        assert_eq!(v.len(), 4);
        let c = v.iter().sum::<Point>() / 4.0;
        assert_relative_eq!(c, Point::repeat(0.25), epsilon = 1e-12);

        r.plane_cut(&Point::repeat(1.0), -2.0);
        assert!(r.is_empty());
    }

    #[test]
    fn inverted_tet() {
        // Three fixed points and a free vertex on the wrong side of them
        let ring = vec![
            Point::new(0.0, 0.0, 0.0),
            Point::new(1.0, 0.0, 0.0),
            Point::new(0.0, 1.0, 0.0),
        ];
        let mut s = TetSimplex::new(ring, Point::new(0.2, 0.2, -0.5), &[[0, 1, 2]]);
        assert!(s.volumes_at(&s.position())[0] < 0.0);
        assert!(untangle(&mut s));
        assert!(s.volumes_at(&s.position())[0] > 0.0);
    }

    #[test]
    fn tangled_octahedron() {
        let mut s = octahedron(Point::new(0.9, 0.8, 0.7));
        assert!(!s.is_valid_at(&s.position()));
        assert!(untangle(&mut s));
        assert!(s.is_valid_at(&s.position()));
        assert_relative_eq!(s.position(), Point::zeros(), epsilon = 1e-9);
    }
}
