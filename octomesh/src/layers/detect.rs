//! Detection of prismatic layers standing on the boundary
use super::LAYER_POINTS_SUBSET;
use crate::{graph::Graph, mesh::PolyMesh};
use std::collections::{BTreeSet, HashMap};

/// A prism cell standing on a boundary face
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerCell {
    /// Cell label
    pub cell: usize,
    /// Mesh label of the boundary face the cell stands on
    pub face: usize,
    /// Patch of that face
    pub patch: usize,
    /// Points of the boundary face, oriented out of the mesh
    pub bottom: Vec<usize>,
    /// Points of the opposite face; `top[i]` is joined to `bottom[i]`
    pub top: Vec<usize>,
}

/// Layer cells of a mesh and the hairs joining their bottom and top points
#[derive(Clone, Debug)]
pub struct LayerHairs {
    /// Detected layer cells
    pub cells: Vec<LayerCell>,
    /// Hairs as `[bottom, top]` point pairs
    pub hairs: Vec<[usize; 2]>,
    /// Hairs of each layer cell, in bottom-point order
    pub cell_hairs: Vec<Vec<usize>>,
    /// Layer cells around each hair
    pub hair_cells: Graph,
    /// Hairs whose bottom point also touches a boundary face that is not
    /// the bottom of a layer cell
    pub border: Vec<bool>,
}

impl LayerHairs {
    /// Returns the hairs next to a hair in the bottom polygon of one of its
    /// cells
    pub fn neighbours(&self, h: usize) -> Vec<usize> {
        let mut out = BTreeSet::new();
        for c in self.hair_cells.row(h) {
            let row = &self.cell_hairs[*c];
            let n = row.len();
            if let Some(i) = row.iter().position(|x| *x == h) {
                out.insert(row[(i + 1) % n]);
                out.insert(row[(i + n - 1) % n]);
            }
        }
        out.remove(&h);
        out.into_iter().collect()
    }

    /// Checks whether no layer was found
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Tries to read cell `c` as a prism standing on its boundary face `bottom`
fn prism_over(mesh: &PolyMesh, c: usize, bottom: &[usize]) -> Option<Vec<usize>> {
    let faces = mesh.cell_faces_oriented(c);
    let n = bottom.len();
    if faces.len() != n + 2 {
        return None;
    }
    let in_bottom = |p: &usize| bottom.contains(p);
    let top = faces
        .iter()
        .find(|f| f.len() == n && !f.iter().any(in_bottom))?;
    let mut partner = HashMap::new();
    for f in &faces {
        if f.len() == n && (f.iter().all(in_bottom) || !f.iter().any(in_bottom)) {
            continue;
        }
        if f.len() != 4 || f.iter().filter(|p| in_bottom(p)).count() != 2 {
            return None;
        }
        for i in 0..4 {
            let (a, b) = (f[i], f[(i + 1) % 4]);
            if in_bottom(&a) && !in_bottom(&b) {
                partner.insert(a, b);
            } else if in_bottom(&b) && !in_bottom(&a) {
                partner.insert(b, a);
            }
        }
    }
    let out: Option<Vec<usize>> = bottom.iter().map(|p| partner.get(p).copied()).collect();
    let out = out?;
    let set: BTreeSet<usize> = out.iter().copied().collect();
    (set.len() == n && set == top.iter().copied().collect()).then_some(out)
}

/// Finds the prism layers of a mesh
///
/// A layer cell is a prism standing on a boundary face outside of `empty`
/// patches.  When the mesh carries the point subset written by layer
/// extrusion, only faces made entirely of extruded points are considered,
/// which tells the bottom of a hexahedral prism apart from its sides.
pub fn detect_boundary_layers(mesh: &PolyMesh) -> LayerHairs {
    let extruded = mesh.subsets().points.get(LAYER_POINTS_SUBSET);
    let mut cells = vec![];
    let mut used = vec![false; mesh.n_cells()];
    for f in mesh.boundary_faces() {
        let patch = mesh.face_patch(f).unwrap_or(0);
        if mesh.patches()[patch].kind == "empty" {
            continue;
        }
        let bottom = &mesh.faces()[f];
        if let Some(set) = extruded {
            if !bottom.iter().all(|p| set.contains(p)) {
                continue;
            }
        }
        let c = mesh.owner()[f];
        if used[c] {
            continue;
        }
        if let Some(top) = prism_over(mesh, c, bottom) {
            used[c] = true;
            cells.push(LayerCell {
                cell: c,
                face: f,
                patch,
                bottom: bottom.clone(),
                top,
            });
        }
    }

    let mut lookup: HashMap<[usize; 2], usize> = HashMap::new();
    let mut hairs = vec![];
    let mut cell_hairs = vec![];
    for lc in &cells {
        cell_hairs.push(
            lc.bottom
                .iter()
                .zip(&lc.top)
                .map(|(b, t)| {
                    *lookup.entry([*b, *t]).or_insert_with(|| {
                        hairs.push([*b, *t]);
                        hairs.len() - 1
                    })
                })
                .collect::<Vec<usize>>(),
        );
    }
    let hair_cells = Graph::from_rows(cell_hairs.iter().cloned()).reverse(hairs.len());

    let bottoms: BTreeSet<usize> = cells.iter().map(|c| c.face).collect();
    let pf = mesh.point_faces();
    let border = hairs
        .iter()
        .map(|[b, _]| {
            pf.row(*b)
                .iter()
                .any(|f| !mesh.is_internal_face(*f) && !bottoms.contains(f))
        })
        .collect();
    LayerHairs {
        cells,
        hairs,
        cell_hairs,
        hair_cells,
        border,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::test::hex_block;

    #[test]
    fn block_without_marks() {
        // Without the extrusion marks every boundary hex reads as a prism
        let m = hex_block(2);
        let h = detect_boundary_layers(&m);
        assert_eq!(h.cells.len(), 8);
        for lc in &h.cells {
            assert_eq!(lc.bottom.len(), 4);
            assert!(lc.top.iter().all(|p| !lc.bottom.contains(p)));
        }
        assert!(h.border.iter().any(|b| *b));
    }

    #[test]
    fn marked_points() {
        let mut m = hex_block(1);
        // Only the z = 0 face is made of marked points
        m.subsets_mut()
            .points
            .insert(LAYER_POINTS_SUBSET.to_owned(), [0, 1, 2, 3].into());
        let h = detect_boundary_layers(&m);
        assert_eq!(h.cells.len(), 1);
        assert_eq!(h.hairs.len(), 4);
        for [b, t] in &h.hairs {
            assert_eq!(*t, *b + 4);
        }
        // Every hair is on the border of the layer
        assert!(h.border.iter().all(|b| *b));
        assert_eq!(h.neighbours(0).len(), 2);
    }
}
