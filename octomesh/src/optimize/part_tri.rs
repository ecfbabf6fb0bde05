//! Triangle rings around boundary points
use super::TriSimplex;
use crate::{geom::Point, mesh::SurfaceEngine};
use std::collections::HashMap;

/// Orthonormal frame in the tangent plane of a boundary point
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TangentFrame {
    /// Origin of the frame
    pub origin: Point,
    /// First tangent direction
    pub u: Point,
    /// Second tangent direction
    pub v: Point,
    /// Unit normal
    pub n: Point,
}

impl TangentFrame {
    /// Builds a frame from an origin and a unit normal
    pub fn new(origin: Point, n: Point) -> Self {
        let helper = if n.x.abs() < 0.9 { Point::x() } else { Point::y() };
        let u = n.cross(&helper).normalize();
        let v = n.cross(&u);
        Self { origin, u, v, n }
    }

    /// Projects a point into the plane
    pub fn to_local(&self, p: &Point) -> [f64; 2] {
        let d = p - self.origin;
        [d.dot(&self.u), d.dot(&self.v)]
    }

    /// Lifts plane coordinates back into space
    pub fn to_global(&self, x: [f64; 2]) -> Point {
        self.origin + self.u * x[0] + self.v * x[1]
    }
}

/// Corner triangles of the boundary faces around every boundary point
///
/// At each corner of a boundary face, the triangle `(previous, point, next)`
/// is counter-clockwise when seen from outside of the mesh.  A boundary
/// point is valid when every such triangle around it is counter-clockwise
/// in its tangent plane.
#[derive(Clone, Debug)]
pub struct PartTriMesh {
    /// `(previous, next)` mesh points of every corner at a boundary point
    corners: Vec<Vec<[usize; 2]>>,
}

impl PartTriMesh {
    /// Collects the corner triangles of every boundary point
    pub fn new(engine: &SurfaceEngine) -> Self {
        let faces = engine.boundary_faces();
        let corners = (0..engine.boundary_points().len())
            .map(|bp| {
                let p = engine.boundary_points()[bp];
                engine
                    .point_faces()
                    .row(bp)
                    .iter()
                    .filter_map(|f| {
                        let face = &faces[*f];
                        let n = face.len();
                        let i = face.iter().position(|q| *q == p)?;
                        Some([face[(i + n - 1) % n], face[(i + 1) % n]])
                    })
                    .collect()
            })
            .collect();
        Self { corners }
    }

    /// Builds the ring of triangles around a boundary point, flattened into
    /// the tangent plane given by `normal`
    pub fn simplex(
        &self,
        bp: usize,
        point: &Point,
        normal: &Point,
        points: &[Point],
    ) -> (TriSimplex, TangentFrame) {
        let frame = TangentFrame::new(*point, *normal);
        let mut local = HashMap::new();
        let mut ring = vec![];
        let mut triangles = vec![];
        for [prev, next] in &self.corners[bp] {
            let mut index = |q: usize| {
                *local.entry(q).or_insert_with(|| {
                    ring.push(frame.to_local(&points[q]));
                    ring.len() - 1
                })
            };
            let (a, b) = (index(*next), index(*prev));
            triangles.push([a, b, usize::MAX]);
        }
        let free = ring.len();
        ring.push([0.0, 0.0]);
        for t in &mut triangles {
            t[2] = free;
        }
        (
            TriSimplex {
                points: ring,
                triangles,
            },
            frame,
        )
    }

    /// Splits boundary points into groups which never share a face
    pub fn colour(&self, engine: &SurfaceEngine, points: &[usize]) -> Vec<Vec<usize>> {
        let n = engine.boundary_points().len();
        let mut colour: Vec<Option<usize>> = vec![None; n];
        let mut groups: Vec<Vec<usize>> = vec![];
        for &bp in points {
            let mut used = vec![false; groups.len()];
            for f in engine.point_faces().row(bp) {
                for q in &engine.boundary_faces()[*f] {
                    if let Some(c) = engine.bp(*q).and_then(|b| colour[b]) {
                        used[c] = true;
                    }
                }
            }
            let c = used.iter().position(|u| !u).unwrap_or(groups.len());
            if c == groups.len() {
                groups.push(vec![]);
            }
            groups[c].push(bp);
            colour[bp] = Some(c);
        }
        groups
    }
}
