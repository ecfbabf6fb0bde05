//! Cell-by-cell mesh construction
use super::{BoundaryPatch, PolyMesh};
use crate::{geom::Point, Error};
use log::debug;
use std::collections::HashMap;

/// Incremental builder for a [`PolyMesh`]
///
/// Cells are added as lists of faces, each oriented outwards from the new
/// cell.  A face seen a second time (with reversed orientation) becomes an
/// internal face between the two cells; faces seen once end up on the
/// boundary.
#[derive(Debug, Default)]
pub struct MeshBuilder {
    points: Vec<Point>,
    patches: Vec<(String, String)>,
    faces: Vec<Vec<usize>>,
    lookup: HashMap<Vec<usize>, usize>,
    face_cells: Vec<(usize, Option<usize>)>,
    face_patch: Vec<Option<usize>>,
    n_cells: usize,
}

impl MeshBuilder {
    /// Builds an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a builder over an existing set of points
    pub fn with_points(points: Vec<Point>) -> Self {
        Self {
            points,
            ..Self::default()
        }
    }

    /// Adds a point, returning its label
    pub fn add_point(&mut self, p: Point) -> usize {
        self.points.push(p);
        self.points.len() - 1
    }

    /// Returns the points added so far
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Returns the number of cells added so far
    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    /// Registers a boundary patch, returning its index
    ///
    /// Registering an existing name returns the existing index.
    pub fn add_patch(&mut self, name: &str, kind: &str) -> usize {
        match self.patches.iter().position(|(n, _)| n == name) {
            Some(i) => i,
            None => {
                self.patches.push((name.to_owned(), kind.to_owned()));
                self.patches.len() - 1
            }
        }
    }

    /// Adds a cell from its outward-oriented faces
    pub fn add_cell<I: IntoIterator<Item = Vec<usize>>>(&mut self, faces: I) -> Result<usize, Error> {
        self.add_cell_with_patches(faces.into_iter().map(|f| (f, None)))
    }

    /// Adds a cell whose faces may carry a boundary patch
    ///
    /// The patch only matters if the face stays on the boundary; faces
    /// without a patch go to the default patch given to
    /// [`build`](Self::build).
    pub fn add_cell_with_patches<I>(&mut self, faces: I) -> Result<usize, Error>
    where
        I: IntoIterator<Item = (Vec<usize>, Option<usize>)>,
    {
        let cell = self.n_cells;
        for (nodes, patch) in faces {
            if nodes.len() < 3 {
                return Err(Error::InvalidMesh(format!(
                    "cell {cell} has a face with {} points",
                    nodes.len()
                )));
            }
            let mut key = nodes.clone();
            key.sort_unstable();
            match self.lookup.get(&key) {
                Some(&f) => {
                    let entry = &mut self.face_cells[f];
                    if entry.1.is_some() || entry.0 == cell {
                        return Err(Error::InvalidMesh(format!(
                            "face {:?} is used by more than two cells",
                            nodes
                        )));
                    }
                    if !is_reversed(&self.faces[f], &nodes) {
                        return Err(Error::InvalidMesh(format!(
                            "face {:?} has the same orientation in cells {} and {cell}",
                            nodes, entry.0
                        )));
                    }
                    entry.1 = Some(cell);
                }
                None => {
                    self.lookup.insert(key, self.faces.len());
                    self.faces.push(nodes);
                    self.face_cells.push((cell, None));
                    self.face_patch.push(patch);
                }
            }
        }
        self.n_cells += 1;
        Ok(cell)
    }

    /// Finishes the mesh
    ///
    /// Boundary faces without a patch are placed in `default_patch`, which
    /// is only created if needed.
    pub fn build(mut self, default_patch: &str) -> Result<PolyMesh, Error> {
        if self.n_cells == 0 {
            return Err(Error::EmptyMesh);
        }
        let mut internal = vec![];
        let mut boundary = vec![];
        for (f, (o, n)) in self.face_cells.iter().enumerate() {
            match n {
                Some(n) => internal.push((*o, *n, f)),
                None => boundary.push(f),
            }
        }
        internal.sort_unstable();

        let default = if boundary.iter().any(|f| self.face_patch[*f].is_none()) {
            Some(self.add_patch(default_patch, "patch"))
        } else {
            None
        };
        let patch_of = |f: usize| self.face_patch[f].or(default).unwrap_or(0);
        let mut boundary: Vec<(usize, usize, usize)> = boundary
            .into_iter()
            .map(|f| (patch_of(f), self.face_cells[f].0, f))
            .collect();
        boundary.sort_unstable();

        let n_internal = internal.len();
        let mut faces = Vec::with_capacity(self.faces.len());
        let mut owner = Vec::with_capacity(self.faces.len());
        let mut neighbour = Vec::with_capacity(n_internal);
        for (o, n, f) in &internal {
            faces.push(std::mem::take(&mut self.faces[*f]));
            owner.push(*o);
            neighbour.push(*n);
        }
        let mut patches: Vec<BoundaryPatch> = self
            .patches
            .iter()
            .map(|(name, kind)| BoundaryPatch {
                name: name.clone(),
                kind: kind.clone(),
                start: 0,
                size: 0,
            })
            .collect();
        for (p, o, f) in &boundary {
            faces.push(std::mem::take(&mut self.faces[*f]));
            owner.push(*o);
            patches[*p].size += 1;
        }
        let mut start = n_internal;
        for p in &mut patches {
            p.start = start;
            start += p.size;
        }
        debug!(
            "built mesh: {} points, {} cells, {} internal and {} boundary faces",
            self.points.len(),
            self.n_cells,
            n_internal,
            boundary.len()
        );
        Ok(PolyMesh {
            points: self.points,
            faces,
            owner,
            neighbour,
            n_cells: self.n_cells,
            patches,
            ..PolyMesh::default()
        })
    }
}

/// Checks whether `b` is the cyclic reversal of `a`
fn is_reversed(a: &[usize], b: &[usize]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let Some(start) = b.iter().position(|p| *p == a[0]) else {
        return false;
    };
    let n = a.len();
    (0..n).all(|i| a[i] == b[(start + n - i) % n])
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::test::hex_faces;

    #[test]
    fn reversal() {
        assert!(is_reversed(&[0, 1, 2, 3], &[0, 3, 2, 1]));
        assert!(is_reversed(&[0, 1, 2, 3], &[2, 1, 0, 3]));
        assert!(!is_reversed(&[0, 1, 2, 3], &[1, 2, 3, 0]));
    }

    #[test]
    fn errors() {
        assert!(matches!(
            MeshBuilder::new().build("walls"),
            Err(Error::EmptyMesh)
        ));

        let mut b = MeshBuilder::new();
        let c: [usize; 8] = std::array::from_fn(|i| i);
        b.add_cell(hex_faces(&c)).unwrap();
        // Same cell again: every face would have the same orientation
        assert!(matches!(b.add_cell(hex_faces(&c)), Err(Error::InvalidMesh(_))));
        assert!(matches!(
            b.add_cell([vec![0, 1]]),
            Err(Error::InvalidMesh(_))
        ));
    }

    #[test]
    fn patches() {
        let mut b = MeshBuilder::new();
        let inlet = b.add_patch("inlet", "patch");
        assert_eq!(b.add_patch("inlet", "wall"), inlet);
        let c: [usize; 8] = std::array::from_fn(|i| i);
        let faces = hex_faces(&c);
        b.add_cell_with_patches(
            faces
                .into_iter()
                .enumerate()
                .map(|(i, f)| (f, (i == 0).then_some(inlet))),
        )
        .unwrap();
        let m = b.build("walls").unwrap();
        assert_eq!(m.patches().len(), 2);
        assert_eq!(m.patches()[0].name, "inlet");
        assert_eq!(m.patches()[0].size, 1);
        assert_eq!(m.patches()[1].size, 5);
        assert_eq!(m.patches()[1].start, 1);
        assert_eq!(m.face_patch(0), Some(0));
        assert_eq!(m.face_patch(5), Some(1));
    }
}
