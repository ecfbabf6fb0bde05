//! Detection and removal of non-manifold boundary configurations
use super::decompose_faces;
use crate::{
    extract::DEFAULT_PATCH,
    mesh::{PolyMesh, SurfaceEngine},
    Error,
};
use log::{info, warn};
use std::collections::BTreeMap;

/// Groups the boundary faces around one point into edge-connected fans
///
/// Two faces are connected when they share a boundary edge at the point and
/// no other boundary face uses that edge.  Faces are boundary face labels.
fn face_groups(s: &SurfaceEngine, bp: usize) -> Vec<Vec<usize>> {
    let faces = s.point_faces().row(bp);
    let point = s.boundary_points()[bp];
    let mut group: Vec<usize> = (0..faces.len()).collect();
    fn root(group: &mut [usize], mut i: usize) -> usize {
        while group[i] != i {
            group[i] = group[group[i]];
            i = group[i];
        }
        i
    }
    for (i, f) in faces.iter().enumerate() {
        for &e in s.face_edges().row(*f) {
            if !s.edges()[e].contains(&point) {
                continue;
            }
            let around = s.edge_faces().row(e);
            if around.len() != 2 {
                continue;
            }
            let other = if around[0] == *f { around[1] } else { around[0] };
            if let Some(j) = faces.iter().position(|g| *g == other) {
                let (a, b) = (root(&mut group, i), root(&mut group, j));
                group[a.max(b)] = a.min(b);
            }
        }
    }
    let mut out: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, f) in faces.iter().enumerate() {
        let r = root(&mut group, i);
        out.entry(r).or_default().push(*f);
    }
    out.into_values().collect()
}

/// Finds boundary points where more than one fan of boundary faces meets
///
/// Returns, for each such mesh point, its fans of boundary faces (as mesh
/// face labels), largest first.
pub fn non_manifold_points(mesh: &PolyMesh) -> BTreeMap<usize, Vec<Vec<usize>>> {
    let s = SurfaceEngine::new(mesh);
    let mut out = BTreeMap::new();
    for bp in 0..s.boundary_points().len() {
        let mut groups = face_groups(&s, bp);
        if groups.len() < 2 {
            continue;
        }
        for g in &mut groups {
            for f in g.iter_mut() {
                *f = s.face_labels()[*f];
            }
        }
        groups.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));
        out.insert(s.boundary_points()[bp], groups);
    }
    out
}

/// Removes cells until every boundary point is manifold
///
/// At each non-manifold point the largest fan of boundary faces is kept
/// and the cells owning the other fans are removed.  Returns the number of
/// removed cells.
pub fn check_irregular_surface_connections(mesh: &mut PolyMesh) -> Result<usize, Error> {
    let mut removed = 0;
    for _ in 0..10 {
        let bad = non_manifold_points(mesh);
        if bad.is_empty() {
            break;
        }
        let mut remove = vec![false; mesh.n_cells()];
        for groups in bad.values() {
            for f in groups.iter().skip(1).flatten() {
                remove[mesh.owner()[*f]] = true;
            }
        }
        let n = remove.iter().filter(|r| **r).count();
        if n == mesh.n_cells() {
            warn!("cannot fix {} non-manifold points without emptying the mesh", bad.len());
            break;
        }
        info!("removing {n} cells at {} non-manifold boundary points", bad.len());
        mesh.remove_cells(&remove, DEFAULT_PATCH)?;
        removed += n;
    }
    Ok(removed)
}

/// Decomposes pairs of boundary faces which share two consecutive edges
///
/// Such pairs meet at a boundary point with only two faces around it; the
/// point cannot be projected without folding one of the faces.  Returns the
/// number of decomposed faces.
pub fn check_boundary_faces_sharing_two_edges(mesh: &mut PolyMesh) -> Result<usize, Error> {
    let s = SurfaceEngine::new(mesh);
    let mut flags = vec![false; mesh.n_faces()];
    for bp in 0..s.boundary_points().len() {
        let faces = s.point_faces().row(bp);
        if faces.len() == 2 {
            for f in faces {
                flags[s.face_labels()[*f]] = true;
            }
        }
    }
    decompose_faces(mesh, &flags)
}
