//! Triangulated input surfaces
//!
//! A [`TriSurface`] holds points, triangular facets tagged with a patch, the
//! patch table and an explicit list of feature edges.  Secondary connectivity
//! (edges, point-facets, pseudo-normals) is computed on first access and
//! cached until [`TriSurface::clear_addressing`] is called.
use crate::{
    geom::{BoundBox, Point, TriangleFeature},
    graph::Graph,
    Error,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

mod shapes;
pub(crate) mod stl;

pub use shapes::{box_surface, extruded_polygon, sphere_surface};

/// A named group of facets
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Patch name
    pub name: String,
    /// Patch type (`"patch"`, `"wall"`, `"empty"`, ...)
    pub kind: String,
}

impl Patch {
    /// Builds a patch of the default `patch` type
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            kind: "patch".to_owned(),
        }
    }
}

/// A triangle with a patch label
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facet {
    /// Point indices, counter-clockwise when seen from outside
    pub points: [usize; 3],
    /// Index into [`TriSurface::patches`]
    pub patch: usize,
}

/// Lazily built connectivity of a [`TriSurface`]
#[derive(Debug)]
struct SurfaceAddressing {
    /// Unique undirected edges, as sorted point pairs
    edges: Vec<[usize; 2]>,
    /// Facets sharing each edge
    edge_facets: Graph,
    /// Edge `i` of a facet joins points `i` and `(i + 1) % 3`
    facet_edges: Vec<[usize; 3]>,
    /// Facets around each point
    point_facets: Graph,
    /// Edges around each point
    point_edges: Graph,
    /// Unit facet normals
    facet_normals: Vec<Point>,
    /// Angle-weighted vertex pseudo-normals
    point_normals: Vec<Point>,
    /// Feature flag for each edge
    feature: Vec<bool>,
}

/// Triangulated surface
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TriSurface {
    points: Vec<Point>,
    facets: Vec<Facet>,
    patches: Vec<Patch>,
    feature_edges: Vec<[usize; 2]>,

    #[serde(skip)]
    addressing: OnceCell<SurfaceAddressing>,
}

impl Clone for TriSurface {
    fn clone(&self) -> Self {
        Self {
            points: self.points.clone(),
            facets: self.facets.clone(),
            patches: self.patches.clone(),
            feature_edges: self.feature_edges.clone(),
            addressing: OnceCell::new(),
        }
    }
}

impl TriSurface {
    /// Builds a surface from its raw parts
    ///
    /// Returns an error if the surface is empty or a facet refers to a point
    /// or patch which does not exist.
    pub fn new(
        points: Vec<Point>,
        facets: Vec<Facet>,
        patches: Vec<Patch>,
    ) -> Result<Self, Error> {
        if facets.is_empty() {
            return Err(Error::EmptySurface);
        }
        for f in &facets {
            if f.points.iter().any(|p| *p >= points.len()) {
                return Err(Error::BadConfig(
                    "surface",
                    format!("facet {:?} refers to a missing point", f.points),
                ));
            }
            if f.patch >= patches.len() {
                return Err(Error::BadConfig(
                    "surface",
                    format!("facet refers to missing patch {}", f.patch),
                ));
            }
        }
        Ok(Self {
            points,
            facets,
            patches,
            feature_edges: vec![],
            addressing: OnceCell::new(),
        })
    }

    /// Returns surface points
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Returns surface facets
    pub fn facets(&self) -> &[Facet] {
        &self.facets
    }

    /// Returns the patch table
    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// Looks up a patch by name
    pub fn patch_index(&self, name: &str) -> Option<usize> {
        self.patches.iter().position(|p| p.name == name)
    }

    /// Returns the explicitly listed feature edges
    pub fn feature_edges(&self) -> &[[usize; 2]] {
        &self.feature_edges
    }

    /// Adds explicit feature edges, invalidating cached addressing
    pub fn add_feature_edges<I: IntoIterator<Item = [usize; 2]>>(&mut self, e: I) {
        self.feature_edges.extend(e);
        self.clear_addressing();
    }

    /// Drops all cached connectivity
    pub fn clear_addressing(&mut self) {
        self.addressing.take();
    }

    /// Returns the corner positions of a facet
    pub fn facet_points(&self, f: usize) -> [Point; 3] {
        self.facets[f].points.map(|i| self.points[i])
    }

    /// Returns the bounding box of all points
    pub fn bounding_box(&self) -> BoundBox {
        BoundBox::from_points(&self.points)
    }

    /// Returns the bounding box of a single facet
    pub fn facet_box(&self, f: usize) -> BoundBox {
        BoundBox::from_points(&self.facet_points(f))
    }

    /// Returns the unit normal of a facet
    pub fn facet_normal(&self, f: usize) -> Point {
        self.addressing().facet_normals[f]
    }

    /// Returns the unique undirected edges
    pub fn edges(&self) -> &[[usize; 2]] {
        &self.addressing().edges
    }

    /// Returns the facets around each edge
    pub fn edge_facets(&self) -> &Graph {
        &self.addressing().edge_facets
    }

    /// Returns the three edges of each facet
    pub fn facet_edges(&self) -> &[[usize; 3]] {
        &self.addressing().facet_edges
    }

    /// Returns the facets around each point
    pub fn point_facets(&self) -> &Graph {
        &self.addressing().point_facets
    }

    /// Returns the edges around each point
    pub fn point_edges(&self) -> &Graph {
        &self.addressing().point_edges
    }

    /// Checks whether an edge is a feature edge
    ///
    /// Feature edges are the explicitly listed ones plus every edge between
    /// facets of different patches.
    pub fn is_feature_edge(&self, e: usize) -> bool {
        self.addressing().feature[e]
    }

    /// Returns the number of feature edges at each point
    pub fn feature_edges_at_point(&self, p: usize) -> usize {
        self.point_edges()
            .row(p)
            .iter()
            .filter(|e| self.is_feature_edge(**e))
            .count()
    }

    /// Checks whether a point is a surface corner
    ///
    /// A corner is where three or more feature edges meet, or where a single
    /// feature edge ends.
    pub fn is_corner(&self, p: usize) -> bool {
        let n = self.feature_edges_at_point(p);
        n == 1 || n > 2
    }

    /// Returns the edges which do not have exactly two facets
    ///
    /// An empty result means the surface is closed (watertight).
    pub fn open_edges(&self) -> Vec<usize> {
        let ef = self.edge_facets();
        (0..ef.n_rows()).filter(|e| ef.size_of_row(*e) != 2).collect()
    }

    /// Marks edges whose dihedral angle exceeds `angle` (radians) as features
    ///
    /// Returns the number of new feature edges.
    pub fn detect_feature_edges(&mut self, angle: f64) -> usize {
        let cos = angle.cos();
        let mut new = vec![];
        {
            let a = self.addressing();
            for (e, facets) in a.edge_facets.rows().enumerate() {
                if a.feature[e] || facets.len() != 2 {
                    continue;
                }
                let n0 = a.facet_normals[facets[0]];
                let n1 = a.facet_normals[facets[1]];
                if n0.dot(&n1) < cos {
                    new.push(a.edges[e]);
                }
            }
        }
        let n = new.len();
        if n > 0 {
            self.add_feature_edges(new);
        }
        n
    }

    /// Returns the pseudo-normal of the facet feature nearest to a point
    ///
    /// For points nearest to a facet interior this is the facet normal; for
    /// edges it is the sum of the adjacent facet normals; for vertices it is
    /// the angle-weighted vertex normal.  The sign of `(p - nearest) · n` is
    /// then a reliable inside/outside test for closed surfaces.
    pub fn pseudo_normal(&self, f: usize, feature: TriangleFeature) -> Point {
        let a = self.addressing();
        match feature {
            TriangleFeature::Face => a.facet_normals[f],
            TriangleFeature::Edge(i) => {
                let e = a.facet_edges[f][i as usize];
                a.edge_facets
                    .row(e)
                    .iter()
                    .map(|f| a.facet_normals[*f])
                    .sum()
            }
            TriangleFeature::Vertex(i) => {
                a.point_normals[self.facets[f].points[i as usize]]
            }
        }
    }

    /// Returns the average edge length of the surface
    pub fn average_edge_length(&self) -> f64 {
        let edges = self.edges();
        if edges.is_empty() {
            return 0.0;
        }
        edges
            .iter()
            .map(|[a, b]| (self.points[*a] - self.points[*b]).norm())
            .sum::<f64>()
            / edges.len() as f64
    }

    fn addressing(&self) -> &SurfaceAddressing {
        self.addressing.get_or_init(|| self.build_addressing())
    }

    fn build_addressing(&self) -> SurfaceAddressing {
        let mut edge_map: HashMap<[usize; 2], usize> = HashMap::new();
        let mut edges = vec![];
        let mut facet_edges = Vec::with_capacity(self.facets.len());
        let mut ef_pairs = vec![];
        for (fi, f) in self.facets.iter().enumerate() {
            let mut fe = [0; 3];
            for i in 0..3 {
                let a = f.points[i];
                let b = f.points[(i + 1) % 3];
                let key = if a < b { [a, b] } else { [b, a] };
                let e = *edge_map.entry(key).or_insert_with(|| {
                    edges.push(key);
                    edges.len() - 1
                });
                fe[i] = e;
                ef_pairs.push((e, fi));
            }
            facet_edges.push(fe);
        }
        let edge_facets = Graph::from_pairs(edges.len(), &ef_pairs);

        let pf_pairs = self
            .facets
            .iter()
            .enumerate()
            .flat_map(|(fi, f)| f.points.iter().map(move |p| (*p, fi)))
            .collect::<Vec<_>>();
        let point_facets = Graph::from_pairs(self.points.len(), &pf_pairs);

        let pe_pairs = edges
            .iter()
            .enumerate()
            .flat_map(|(ei, e)| e.iter().map(move |p| (*p, ei)))
            .collect::<Vec<_>>();
        let point_edges = Graph::from_pairs(self.points.len(), &pe_pairs);

        let facet_normals = self
            .facets
            .iter()
            .map(|f| {
                let [a, b, c] = f.points.map(|i| self.points[i]);
                let n = (b - a).cross(&(c - a));
                let l = n.norm();
                if l > f64::MIN_POSITIVE { n / l } else { n }
            })
            .collect::<Vec<_>>();

        let mut point_normals = vec![Point::zeros(); self.points.len()];
        for (fi, f) in self.facets.iter().enumerate() {
            for i in 0..3 {
                let p = self.points[f.points[i]];
                let u = self.points[f.points[(i + 1) % 3]] - p;
                let v = self.points[f.points[(i + 2) % 3]] - p;
                let denom = u.norm() * v.norm();
                if denom > f64::MIN_POSITIVE {
                    let angle = (u.dot(&v) / denom).clamp(-1.0, 1.0).acos();
                    point_normals[f.points[i]] += facet_normals[fi] * angle;
                }
            }
        }

        let explicit: std::collections::HashSet<[usize; 2]> = self
            .feature_edges
            .iter()
            .map(|&[a, b]| if a < b { [a, b] } else { [b, a] })
            .collect();
        let feature = edges
            .iter()
            .enumerate()
            .map(|(e, key)| {
                let fs = edge_facets.row(e);
                explicit.contains(key)
                    || fs.iter().any(|f| self.facets[*f].patch != self.facets[fs[0]].patch)
            })
            .collect();

        SurfaceAddressing {
            edges,
            edge_facets,
            facet_edges,
            point_facets,
            point_edges,
            facet_normals,
            point_normals,
            feature,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn closed_box() {
        let s = box_surface(&BoundBox::new(Point::zeros(), Point::repeat(1.0)));
        assert_eq!(s.facets().len(), 12);
        assert_eq!(s.patches().len(), 6);
        assert!(s.open_edges().is_empty());
        assert_eq!(s.edges().len(), 18);

        // 12 cube edges separate different patches; the 6 diagonals don't
        let n_feature = (0..s.edges().len()).filter(|e| s.is_feature_edge(*e)).count();
        assert_eq!(n_feature, 12);
        for p in 0..8 {
            assert!(s.is_corner(p));
        }
    }

    #[test]
    fn outward_normals() {
        let s = sphere_surface(Point::zeros(), 1.0, 2);
        assert!(s.open_edges().is_empty());
        for f in 0..s.facets().len() {
            let c = s.facet_points(f).iter().sum::<Point>() / 3.0;
            assert!(c.dot(&s.facet_normal(f)) > 0.0);
        }
    }

    #[test]
    fn open_ribbon() {
        let s = extruded_polygon(
            &[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            0.0,
            0.1,
        );
        // Top and bottom loops are open
        assert_eq!(s.open_edges().len(), 8);
    }

    #[test]
    fn detect_features() {
        let mut s = sphere_surface(Point::zeros(), 1.0, 1);
        assert_eq!(s.detect_feature_edges(std::f64::consts::FRAC_PI_2), 0);
        let mut b = box_surface(&BoundBox::new(Point::zeros(), Point::repeat(1.0)));
        assert_eq!(b.detect_feature_edges(0.1), 0); // already features
        s.clear_addressing();
        assert!(s.open_edges().is_empty());
    }
}
