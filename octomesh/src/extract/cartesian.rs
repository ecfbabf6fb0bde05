//! Polyhedral template with one cell per octree leaf
use super::{BOTTOM_EMPTY_PATCH, DEFAULT_PATCH, TOP_EMPTY_PATCH};
use crate::{
    mesh::{MeshBuilder, PolyMesh},
    octree::{OctreeAddressing, Z},
    Error,
};
use log::info;

/// Builds a polyhedral mesh whose cells are the octree's mesh-cell leaves
///
/// Leaves next to finer leaves become polyhedra: their sides are split into
/// the finer faces, and hanging nodes are inserted on their edges.  In
/// quadtree mode the template is one cell thick, and its `z` faces go to
/// the empty patches.
pub struct CartesianExtractor<'a> {
    addressing: &'a OctreeAddressing<'a>,
}

impl<'a> CartesianExtractor<'a> {
    /// Builds an extractor over a classified octree's addressing
    pub fn new(addressing: &'a OctreeAddressing<'a>) -> Self {
        Self { addressing }
    }

    /// Creates the mesh
    pub fn create_mesh(&self) -> Result<PolyMesh, Error> {
        let a = self.addressing;
        let o = a.octree();
        let mut b = MeshBuilder::new();
        let default = b.add_patch(DEFAULT_PATCH, "patch");
        let empty = o.is_quadtree().then(|| {
            [
                b.add_patch(BOTTOM_EMPTY_PATCH, "empty"),
                b.add_patch(TOP_EMPTY_PATCH, "empty"),
            ]
        });

        let mut points: Vec<Option<usize>> = vec![None; a.n_nodes()];
        let faces = a.octree_faces();
        for leaf in (0..o.n_leaves()).filter(|l| a.is_mesh_cell(*l) && o.is_owned(*l)) {
            let mut cell = Vec::with_capacity(a.leaf_faces().size_of_row(leaf));
            for &f in a.leaf_faces().row(leaf) {
                let face = &faces[f];
                let mut polygon = a.face_polygon(f);
                let other = if face.owner == leaf {
                    face.neighbour
                } else {
                    polygon.reverse();
                    Some(face.owner)
                };
                let polygon: Vec<usize> = polygon
                    .into_iter()
                    .map(|n| *points[n].get_or_insert_with(|| b.add_point(a.node_position(n))))
                    .collect();
                let patch = match (other, empty) {
                    (Some(other), _) if a.is_mesh_cell(other) => None,
                    (None, Some([bottom, top])) if face.side.axis() == Z => {
                        Some(if face.side.is_positive() { top } else { bottom })
                    }
                    _ => Some(default),
                };
                cell.push((polygon, patch));
            }
            b.add_cell_with_patches(cell)?;
        }
        let mesh = b.build(DEFAULT_PATCH)?;
        info!(
            "cartesian template: {} cells, {} points, {} boundary faces",
            mesh.n_cells(),
            mesh.n_points(),
            mesh.boundary_faces().len()
        );
        Ok(mesh)
    }
}
