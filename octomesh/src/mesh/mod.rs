//! Polyhedral volume meshes
//!
//! A [`PolyMesh`] is stored face-based: every face is a list of point
//! labels, owned by one cell and (for internal faces) shared with a
//! neighbour cell of higher label.  Internal faces come first, ordered by
//! owner and then neighbour; boundary faces follow, grouped into
//! [`BoundaryPatch`]es.  A face's points are ordered counter-clockwise when
//! seen from outside of its owner, so its normal points into the neighbour.
//!
//! Meshes are built with a [`MeshBuilder`]; derived connectivity (cells,
//! edges, point-cells, ...) is computed on first access and cached until the
//! topology changes.
use crate::{geom::Point, surface::stl::write_triangles, Error};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufReader, BufWriter, Read, Write};

mod addressing;
mod builder;
mod modifier;
pub mod quality;
mod surface;

pub use builder::MeshBuilder;
pub use modifier::CellFaces;
pub use surface::SurfaceEngine;

use addressing::MeshAddressing;

/// A contiguous range of boundary faces
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryPatch {
    /// Patch name
    pub name: String,
    /// Patch type (`"patch"`, `"wall"`, `"empty"`, ...)
    pub kind: String,
    /// First face of the patch
    pub start: usize,
    /// Number of faces in the patch
    pub size: usize,
}

/// Named sets of points, faces and cells
///
/// Subsets are how later stages are told about problems they should look at
/// (e.g. points the optimiser could not fix).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subsets {
    /// Point subsets
    pub points: BTreeMap<String, BTreeSet<usize>>,
    /// Face subsets
    pub faces: BTreeMap<String, BTreeSet<usize>>,
    /// Cell subsets
    pub cells: BTreeMap<String, BTreeSet<usize>>,
}

/// Polyhedral mesh
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PolyMesh {
    points: Vec<Point>,
    faces: Vec<Vec<usize>>,
    owner: Vec<usize>,
    neighbour: Vec<usize>,
    n_cells: usize,
    patches: Vec<BoundaryPatch>,
    subsets: Subsets,
    metadata: serde_json::Map<String, serde_json::Value>,

    #[serde(skip)]
    addressing: MeshAddressing,
}

impl Clone for PolyMesh {
    fn clone(&self) -> Self {
        Self {
            points: self.points.clone(),
            faces: self.faces.clone(),
            owner: self.owner.clone(),
            neighbour: self.neighbour.clone(),
            n_cells: self.n_cells,
            patches: self.patches.clone(),
            subsets: self.subsets.clone(),
            metadata: self.metadata.clone(),
            addressing: MeshAddressing::default(),
        }
    }
}

impl PolyMesh {
    /// Returns the number of points
    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    /// Returns the number of faces
    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    /// Returns the number of internal faces
    pub fn n_internal_faces(&self) -> usize {
        self.neighbour.len()
    }

    /// Returns the number of cells
    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    /// Returns the points
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Returns the points for modification
    ///
    /// Moving points never invalidates the cached addressing, which is
    /// purely topological.
    pub fn points_mut(&mut self) -> &mut [Point] {
        &mut self.points
    }

    /// Appends a point, returning its label
    pub fn append_point(&mut self, p: Point) -> usize {
        self.points.push(p);
        self.points.len() - 1
    }

    /// Returns all faces
    pub fn faces(&self) -> &[Vec<usize>] {
        &self.faces
    }

    /// Returns the owner cell of every face
    pub fn owner(&self) -> &[usize] {
        &self.owner
    }

    /// Returns the neighbour cell of every internal face
    pub fn neighbour(&self) -> &[usize] {
        &self.neighbour
    }

    /// Returns the neighbour of a face, or `None` for boundary faces
    pub fn face_neighbour(&self, f: usize) -> Option<usize> {
        self.neighbour.get(f).copied()
    }

    /// Checks whether a face is internal
    pub fn is_internal_face(&self, f: usize) -> bool {
        f < self.neighbour.len()
    }

    /// Returns the range of boundary face labels
    pub fn boundary_faces(&self) -> std::ops::Range<usize> {
        self.neighbour.len()..self.faces.len()
    }

    /// Returns the boundary patches
    pub fn patches(&self) -> &[BoundaryPatch] {
        &self.patches
    }

    /// Finds a patch by name
    pub fn patch_index(&self, name: &str) -> Option<usize> {
        self.patches.iter().position(|p| p.name == name)
    }

    /// Returns the patch of a boundary face
    pub fn face_patch(&self, f: usize) -> Option<usize> {
        if self.is_internal_face(f) {
            return None;
        }
        self.patches
            .iter()
            .position(|p| (p.start..p.start + p.size).contains(&f))
    }

    /// Returns the named subsets
    pub fn subsets(&self) -> &Subsets {
        &self.subsets
    }

    /// Returns the named subsets for modification
    pub fn subsets_mut(&mut self) -> &mut Subsets {
        &mut self.subsets
    }

    /// Returns free-form metadata stored with the mesh
    pub fn metadata(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.metadata
    }

    /// Returns metadata for modification
    pub fn metadata_mut(&mut self) -> &mut serde_json::Map<String, serde_json::Value> {
        &mut self.metadata
    }

    /// Returns the faces of a cell, each oriented outwards from that cell
    pub fn cell_faces_oriented(&self, cell: usize) -> Vec<Vec<usize>> {
        self.cells()
            .row(cell)
            .iter()
            .map(|f| {
                let mut nodes = self.faces[*f].clone();
                if self.owner[*f] != cell {
                    nodes.reverse();
                }
                nodes
            })
            .collect()
    }

    /// Returns the cell on the other side of a face
    pub fn other_cell(&self, f: usize, cell: usize) -> Option<usize> {
        if self.owner[f] == cell {
            self.face_neighbour(f)
        } else {
            Some(self.owner[f])
        }
    }

    /// Drops every cached connectivity table
    ///
    /// This must be called after any change to faces or cells.
    pub fn clear_addressing(&mut self) {
        self.addressing = MeshAddressing::default();
    }

    /// Writes the mesh (with subsets and metadata) as JSON
    pub fn write_json<W: Write>(&self, out: W) -> Result<(), Error> {
        let mut out = BufWriter::new(out);
        serde_json::to_writer(&mut out, self)?;
        out.flush()?;
        Ok(())
    }

    /// Reads a mesh written by [`write_json`](Self::write_json)
    pub fn read_json<R: Read>(input: R) -> Result<Self, Error> {
        let mesh: Self = serde_json::from_reader(BufReader::new(input))?;
        mesh.check_topology()?;
        Ok(mesh)
    }

    /// Writes the boundary faces as a binary STL, fanning each polygon
    pub fn write_boundary_stl<W: Write>(&self, out: &mut W) -> Result<(), Error> {
        let count = self
            .boundary_faces()
            .map(|f| self.faces[f].len().saturating_sub(2))
            .sum();
        let tris = self.boundary_faces().flat_map(|f| {
            let face = &self.faces[f];
            (1..face.len().saturating_sub(1)).map(move |i| {
                [
                    self.points[face[0]],
                    self.points[face[i]],
                    self.points[face[i + 1]],
                ]
            })
        });
        write_triangles(out, tris, count)
    }

    /// Checks that labels are in range and patches cover the boundary
    fn check_topology(&self) -> Result<(), Error> {
        if self.owner.len() != self.faces.len() {
            return Err(Error::InvalidMesh(format!(
                "{} faces but {} owners",
                self.faces.len(),
                self.owner.len()
            )));
        }
        if let Some(f) = self.faces.iter().flatten().find(|p| **p >= self.points.len()) {
            return Err(Error::InvalidMesh(format!("point {f} does not exist")));
        }
        if let Some(c) = self
            .owner
            .iter()
            .chain(&self.neighbour)
            .find(|c| **c >= self.n_cells)
        {
            return Err(Error::InvalidMesh(format!("cell {c} does not exist")));
        }
        let mut start = self.neighbour.len();
        for p in &self.patches {
            if p.start != start {
                return Err(Error::InvalidMesh(format!(
                    "patch {} starts at face {} instead of {start}",
                    p.name, p.start
                )));
            }
            start += p.size;
        }
        if start != self.faces.len() {
            return Err(Error::InvalidMesh(
                "patches do not cover the boundary".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Returns the faces of a positively oriented tetrahedron, pointing outwards
///
/// `tet_volume(t[0], t[1], t[2], t[3])` must be positive.
pub fn tet_faces(t: [usize; 4]) -> [Vec<usize>; 4] {
    [
        vec![t[0], t[2], t[1]],
        vec![t[0], t[1], t[3]],
        vec![t[0], t[3], t[2]],
        vec![t[1], t[2], t[3]],
    ]
}

/// Returns the faces of a pyramid with the given base, pointing outwards
///
/// The base must be ordered counter-clockwise seen from outside the pyramid.
pub fn pyramid_faces(base: &[usize], apex: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::with_capacity(base.len() + 1);
    out.push(base.to_vec());
    for i in 0..base.len() {
        let (a, b) = (base[i], base[(i + 1) % base.len()]);
        out.push(vec![b, a, apex]);
    }
    out
}

/// Returns the faces of a prism between two polygons, pointing outwards
///
/// `bottom` is oriented outwards (away from `top`); `top[i]` lies above
/// `bottom[i]`.
pub fn prism_faces(bottom: &[usize], top: &[usize]) -> Vec<Vec<usize>> {
    debug_assert_eq!(bottom.len(), top.len());
    let n = bottom.len();
    let mut out = Vec::with_capacity(n + 2);
    out.push(bottom.to_vec());
    out.push(top.iter().rev().copied().collect());
    for i in 0..n {
        let j = (i + 1) % n;
        out.push(vec![bottom[j], bottom[i], top[i], top[j]]);
    }
    out
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::geom::{self, tet_volume};
    use approx::assert_relative_eq;

    /// Builds an `n × n × n` block of unit hexahedra
    pub(crate) fn hex_block(n: usize) -> PolyMesh {
        let mut b = MeshBuilder::new();
        let idx = |i: usize, j: usize, k: usize| i + j * (n + 1) + k * (n + 1) * (n + 1);
        for k in 0..=n {
            for j in 0..=n {
                for i in 0..=n {
                    b.add_point(Point::new(i as f64, j as f64, k as f64));
                }
            }
        }
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    let c: [usize; 8] = std::array::from_fn(|m| {
                        idx(i + (m & 1), j + ((m >> 1) & 1), k + ((m >> 2) & 1))
                    });
                    b.add_cell(hex_faces(&c)).unwrap();
                }
            }
        }
        b.build("walls").unwrap()
    }

    /// Outward faces of a hexahedron with corners indexed like octree corners
    pub(crate) fn hex_faces(c: &[usize; 8]) -> Vec<Vec<usize>> {
        [
            [0, 4, 6, 2],
            [1, 3, 7, 5],
            [0, 1, 5, 4],
            [2, 6, 7, 3],
            [0, 2, 3, 1],
            [4, 5, 7, 6],
        ]
        .iter()
        .map(|s| s.iter().map(|i| c[*i]).collect())
        .collect()
    }

    #[test]
    fn block_topology() {
        let m = hex_block(2);
        assert_eq!(m.n_cells(), 8);
        assert_eq!(m.n_points(), 27);
        assert_eq!(m.n_internal_faces(), 12);
        assert_eq!(m.n_faces(), 36);
        assert_eq!(m.patches().len(), 1);
        assert_eq!(m.patches()[0].size, 24);
        for f in 0..m.n_internal_faces() {
            assert!(m.owner()[f] < m.neighbour()[f]);
        }
        // Face normals point from owner to neighbour
        let (centres, _) = quality::cell_centres_and_volumes(&m);
        for f in 0..m.n_internal_faces() {
            let pts: Vec<Point> = m.faces()[f].iter().map(|p| m.points()[*p]).collect();
            let (n, _) = geom::polygon_normal_and_centre(&pts);
            let d = centres[m.neighbour()[f]] - centres[m.owner()[f]];
            assert!(n.dot(&d) > 0.0);
        }
    }

    #[test]
    fn element_faces() {
        let pts = [
            Point::zeros(),
            Point::new(1.0, 0.0, 0.0),
            Point::new(0.0, 1.0, 0.0),
            Point::new(0.0, 0.0, 1.0),
        ];
        assert!(tet_volume(&pts[0], &pts[1], &pts[2], &pts[3]) > 0.0);
        let mut b = MeshBuilder::with_points(pts.to_vec());
        b.add_cell(tet_faces([0, 1, 2, 3])).unwrap();
        let m = b.build("walls").unwrap();
        let (_, vols) = quality::cell_centres_and_volumes(&m);
        assert_relative_eq!(vols[0], 1.0 / 6.0, epsilon = 1e-12);

        let mut b = MeshBuilder::with_points(vec![
            Point::zeros(),
            Point::new(1.0, 0.0, 0.0),
            Point::new(1.0, 1.0, 0.0),
            Point::new(0.0, 1.0, 0.0),
            Point::new(0.5, 0.5, -1.0),
        ]);
        // The base faces +z, so the apex must sit below it
        b.add_cell(pyramid_faces(&[0, 1, 2, 3], 4)).unwrap();
        let m = b.build("walls").unwrap();
        let (_, vols) = quality::cell_centres_and_volumes(&m);
        assert_relative_eq!(vols[0], 1.0 / 3.0, epsilon = 1e-12);

        let mut b = MeshBuilder::with_points(vec![
            Point::zeros(),
            Point::new(1.0, 0.0, 0.0),
            Point::new(0.0, 1.0, 0.0),
            Point::new(0.0, 0.0, 1.0),
            Point::new(1.0, 0.0, 1.0),
            Point::new(0.0, 1.0, 1.0),
        ]);
        // Bottom triangle seen from below is counter-clockwise
        b.add_cell(prism_faces(&[0, 2, 1], &[3, 5, 4])).unwrap();
        let m = b.build("walls").unwrap();
        let (_, vols) = quality::cell_centres_and_volumes(&m);
        assert_relative_eq!(vols[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn json_checkpoint() {
        let mut m = hex_block(1);
        m.subsets_mut()
            .points
            .entry("bad".to_owned())
            .or_default()
            .insert(3);
        m.metadata_mut()
            .insert("step".to_owned(), serde_json::json!("templateGeneration"));
        let mut buf = vec![];
        m.write_json(&mut buf).unwrap();
        let n = PolyMesh::read_json(buf.as_slice()).unwrap();
        assert_eq!(n.faces(), m.faces());
        assert_eq!(n.subsets(), m.subsets());
        assert_eq!(n.metadata()["step"], "templateGeneration");
        assert_eq!(n.cells().row(0).len(), 6);

        assert!(PolyMesh::read_json(&b"{\"points\": []}"[..]).is_err());
    }

    #[test]
    fn boundary_stl() {
        let m = hex_block(1);
        let mut buf = vec![];
        m.write_boundary_stl(&mut buf).unwrap();
        assert_eq!(buf.len(), 84 + 12 * 50);
    }
}
