//! Topological changes to a mesh
//!
//! Every modification rebuilds the face lists through a [`MeshBuilder`],
//! which keeps the face ordering and patch grouping invariants in one place.
use super::{builder::MeshBuilder, PolyMesh};
use crate::Error;
use log::debug;
use std::collections::BTreeSet;

/// Outward faces of a cell, each with its boundary patch (if any)
pub type CellFaces = Vec<(Vec<usize>, Option<usize>)>;

impl PolyMesh {
    /// Returns every cell as a list of outward faces with their patches
    pub fn to_cell_faces(&self) -> Vec<CellFaces> {
        (0..self.n_cells)
            .map(|c| {
                self.cells()
                    .row(c)
                    .iter()
                    .map(|f| {
                        let mut nodes = self.faces[*f].clone();
                        if self.owner[*f] != c {
                            nodes.reverse();
                        }
                        (nodes, self.face_patch(*f))
                    })
                    .collect()
            })
            .collect()
    }

    /// Replaces all cells, keeping points, patches, point subsets and
    /// metadata
    ///
    /// `cell_map` gives the new label of each old cell, and is used to carry
    /// cell subsets over; face subsets are dropped.  New boundary faces
    /// without a patch go to `default_patch`.
    pub fn rebuild(
        &mut self,
        cells: Vec<CellFaces>,
        cell_map: Option<&[Option<usize>]>,
        default_patch: &str,
    ) -> Result<(), Error> {
        let mut b = MeshBuilder::with_points(self.points.clone());
        for p in &self.patches {
            b.add_patch(&p.name, &p.kind);
        }
        for c in cells {
            b.add_cell_with_patches(c)?;
        }
        let mesh = b.build(default_patch)?;
        let mut subsets = std::mem::take(&mut self.subsets);
        subsets.faces.clear();
        for set in subsets.cells.values_mut() {
            *set = match cell_map {
                Some(map) => set.iter().filter_map(|c| map.get(*c).copied().flatten()).collect(),
                None => BTreeSet::new(),
            };
        }
        let metadata = std::mem::take(&mut self.metadata);
        *self = mesh;
        self.subsets = subsets;
        self.metadata = metadata;
        Ok(())
    }

    /// Removes the flagged cells
    ///
    /// Faces between a removed and a kept cell become boundary faces in the
    /// patch `patch`; points no longer used by any face are removed.
    pub fn remove_cells(&mut self, remove: &[bool], patch: &str) -> Result<(), Error> {
        let n_removed = remove.iter().filter(|r| **r).count();
        if n_removed == 0 {
            return Ok(());
        }
        let mut map = vec![None; self.n_cells];
        let mut cells = vec![];
        for (c, faces) in self.to_cell_faces().into_iter().enumerate() {
            if !remove[c] {
                map[c] = Some(cells.len());
                cells.push(faces);
            }
        }
        self.rebuild(cells, Some(&map), patch)?;
        self.remove_unused_vertices();
        debug!("removed {n_removed} cells");
        Ok(())
    }

    /// Removes points not used by any face, renumbering the rest
    ///
    /// Returns the number of removed points.
    pub fn remove_unused_vertices(&mut self) -> usize {
        let mut used = vec![false; self.points.len()];
        for p in self.faces.iter().flatten() {
            used[*p] = true;
        }
        let n_removed = used.iter().filter(|u| !**u).count();
        if n_removed == 0 {
            return 0;
        }
        let mut map = vec![usize::MAX; self.points.len()];
        let mut points = Vec::with_capacity(self.points.len() - n_removed);
        for (p, u) in used.iter().enumerate() {
            if *u {
                map[p] = points.len();
                points.push(self.points[p]);
            }
        }
        for f in &mut self.faces {
            for p in f.iter_mut() {
                *p = map[*p];
            }
        }
        for set in self.subsets.points.values_mut() {
            *set = set
                .iter()
                .filter(|p| used[**p])
                .map(|p| map[*p])
                .collect();
        }
        self.points = points;
        self.clear_addressing();
        n_removed
    }

    /// Appends cells given by their outward faces
    ///
    /// Faces matching an existing boundary face (with reversed orientation)
    /// become internal faces.  Returns the label of the first new cell.
    pub fn add_cells(&mut self, new: Vec<Vec<Vec<usize>>>) -> Result<usize, Error> {
        let first = self.n_cells;
        let mut cells = self.to_cell_faces();
        let map: Vec<Option<usize>> = (0..first).map(Some).collect();
        cells.extend(
            new.into_iter()
                .map(|c| c.into_iter().map(|f| (f, None)).collect()),
        );
        let default = self
            .patches
            .first()
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "defaultFaces".to_owned());
        self.rebuild(cells, Some(&map), &default)?;
        Ok(first)
    }

    /// Replaces the boundary patches
    ///
    /// `face_patch` gives, for every boundary face (in boundary order), its
    /// index into the new `patches` list of `(name, kind)` pairs.  Boundary
    /// faces are then regrouped by patch.
    pub fn replace_boundary(
        &mut self,
        patches: &[(String, String)],
        face_patch: &[usize],
    ) -> Result<(), Error> {
        let start = self.n_internal_faces();
        if face_patch.len() != self.n_faces() - start {
            return Err(Error::InvalidMesh(format!(
                "{} patch labels for {} boundary faces",
                face_patch.len(),
                self.n_faces() - start
            )));
        }
        if let Some(p) = face_patch.iter().find(|p| **p >= patches.len()) {
            return Err(Error::InvalidMesh(format!("patch {p} does not exist")));
        }
        let mut cells = self.to_cell_faces();
        // to_cell_faces lists a cell's faces in face order, so the boundary
        // faces can be matched up by walking the cells again
        for (c, faces) in cells.iter_mut().enumerate() {
            for ((_, patch), f) in faces.iter_mut().zip(self.cells().row(c)) {
                if *f >= start {
                    *patch = Some(face_patch[*f - start]);
                }
            }
        }
        let map: Vec<Option<usize>> = (0..self.n_cells).map(Some).collect();
        self.patches = patches
            .iter()
            .map(|(name, kind)| super::BoundaryPatch {
                name: name.clone(),
                kind: kind.clone(),
                start: 0,
                size: 0,
            })
            .collect();
        self.rebuild(cells, Some(&map), "defaultFaces")
    }

    /// Regroups boundary faces by patch after the face lists were edited
    pub fn reorder_boundary_faces(&mut self) -> Result<(), Error> {
        let cells = self.to_cell_faces();
        let map: Vec<Option<usize>> = (0..self.n_cells).map(Some).collect();
        self.rebuild(cells, Some(&map), "defaultFaces")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::test::hex_block;

    #[test]
    fn remove_cells() {
        let mut m = hex_block(2);
        m.subsets_mut().cells.entry("c".to_owned()).or_default().extend([0, 7]);
        let mut remove = vec![false; 8];
        remove[7] = true;
        m.remove_cells(&remove, "cut").unwrap();
        assert_eq!(m.n_cells(), 7);
        // The far corner point goes away
        assert_eq!(m.n_points(), 26);
        let cut = m.patch_index("cut").unwrap();
        assert_eq!(m.patches()[cut].size, 3);
        assert_eq!(m.patches()[0].size, 21);
        assert_eq!(m.subsets().cells["c"], BTreeSet::from([0]));
    }

    #[test]
    fn add_cells() {
        let mut m = hex_block(1);
        let pts: Vec<usize> = (0..4)
            .map(|i| {
                m.append_point(crate::geom::Point::new(
                    (i & 1) as f64,
                    ((i >> 1) & 1) as f64,
                    2.0,
                ))
            })
            .collect();
        // A second hex on top of the first
        let c = [4, 5, 6, 7, pts[0], pts[1], pts[2], pts[3]];
        let first = m.add_cells(vec![crate::mesh::test::hex_faces(&c)]).unwrap();
        assert_eq!(first, 1);
        assert_eq!(m.n_cells(), 2);
        assert_eq!(m.n_internal_faces(), 1);
        assert_eq!(m.n_faces(), 11);
    }

    #[test]
    fn replace_boundary() {
        let mut m = hex_block(1);
        let patches = vec![
            ("bottom".to_owned(), "wall".to_owned()),
            ("rest".to_owned(), "patch".to_owned()),
        ];
        let labels: Vec<usize> = m
            .boundary_faces()
            .map(|f| {
                let z_max = m.faces()[f].iter().map(|p| m.points()[*p].z).fold(0.0, f64::max);
                if z_max == 0.0 { 0 } else { 1 }
            })
            .collect();
        m.replace_boundary(&patches, &labels).unwrap();
        assert_eq!(m.patches().len(), 2);
        assert_eq!(m.patches()[0].name, "bottom");
        assert_eq!(m.patches()[0].kind, "wall");
        assert_eq!(m.patches()[0].size, 1);
        assert_eq!(m.patches()[1].size, 5);
        assert!(m.replace_boundary(&patches, &[0]).is_err());
    }
}
