//! Subdivision of faces into triangles and cells into pyramids
use crate::{
    extract::DEFAULT_PATCH,
    geom::{self, Point},
    mesh::{pyramid_faces, quality::cell_centres_and_volumes, CellFaces, PolyMesh},
    Error,
};
use log::debug;

/// Splits each flagged face into triangles fanned from its centre
///
/// Both cells of an internal face see the same triangles; boundary
/// triangles stay in the face's patch.  Returns the number of decomposed
/// faces.
pub fn decompose_faces(mesh: &mut PolyMesh, faces: &[bool]) -> Result<usize, Error> {
    let mut centre = vec![None; mesh.n_faces()];
    let mut n = 0;
    for f in (0..mesh.n_faces()).filter(|f| faces[*f]) {
        let pts: Vec<Point> = mesh.faces()[f].iter().map(|p| mesh.points()[*p]).collect();
        let (_, c) = geom::polygon_normal_and_centre(&pts);
        centre[f] = Some(mesh.append_point(c));
        n += 1;
    }
    if n == 0 {
        return Ok(0);
    }
    let old = mesh.to_cell_faces();
    let cells: Vec<CellFaces> = old
        .into_iter()
        .enumerate()
        .map(|(c, faces)| {
            faces
                .into_iter()
                .zip(mesh.cells().row(c))
                .flat_map(|((nodes, patch), f)| match centre[*f] {
                    Some(apex) => (0..nodes.len())
                        .map(|i| (vec![nodes[i], nodes[(i + 1) % nodes.len()], apex], patch))
                        .collect(),
                    None => vec![(nodes, patch)],
                })
                .collect()
        })
        .collect();
    let map: Vec<Option<usize>> = (0..mesh.n_cells()).map(Some).collect();
    mesh.rebuild(cells, Some(&map), DEFAULT_PATCH)?;
    debug!("decomposed {n} faces");
    Ok(n)
}

/// Replaces each flagged cell by pyramids from its faces to its centre
///
/// The first pyramid of a cell inherits the cell's subset membership.
/// Returns the number of decomposed cells.
pub fn decompose_cells(mesh: &mut PolyMesh, cells: &[bool]) -> Result<usize, Error> {
    if !cells.iter().any(|c| *c) {
        return Ok(0);
    }
    let (centres, _) = cell_centres_and_volumes(mesh);
    let old = mesh.to_cell_faces();
    let mut out = Vec::with_capacity(old.len());
    let mut map = vec![None; old.len()];
    let mut pyramids = vec![];
    let mut n = 0;
    for (c, faces) in old.into_iter().enumerate() {
        if !cells[c] {
            map[c] = Some(out.len());
            out.push(faces);
            continue;
        }
        n += 1;
        let apex = mesh.append_point(centres[c]);
        for (base, patch) in faces {
            let pyramid: CellFaces = pyramid_faces(&base, apex)
                .into_iter()
                .enumerate()
                .map(|(i, f)| (f, if i == 0 { patch } else { None }))
                .collect();
            pyramids.push((c, pyramid));
        }
    }
    for (c, p) in pyramids {
        if map[c].is_none() {
            map[c] = Some(out.len());
        }
        out.push(p);
    }
    mesh.rebuild(out, Some(&map), DEFAULT_PATCH)?;
    debug!("decomposed {n} cells into pyramids");
    Ok(n)
}
