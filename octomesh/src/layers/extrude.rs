//! Extrusion of a single prism layer from boundary faces
use super::{LAYER_CELLS_SUBSET, LAYER_POINTS_SUBSET};
use crate::{
    geom::Point,
    mesh::{prism_faces, CellFaces, PolyMesh, SurfaceEngine},
    Error,
};
use log::debug;
use std::collections::HashMap;

/// Hair length as a fraction of the mean boundary edge length at a point
const HAIR_FRACTION: f64 = 0.4;

/// Removes the components of `h` along each of the given normals
///
/// The normals are orthonormalised first, so `h` ends up in the
/// intersection of the planes they define.  Returns `None` if nothing is
/// left.
pub(crate) fn constrain_to_planes(h: &Point, normals: &[Point]) -> Option<Point> {
    let mut basis: Vec<Point> = vec![];
    for n in normals {
        let mut v = *n;
        for b in &basis {
            v -= b * b.dot(&v);
        }
        if let Some(v) = v.try_normalize(1e-6) {
            basis.push(v);
        }
    }
    let mut out = *h;
    for b in &basis {
        out -= b * b.dot(&out);
    }
    (out.norm() > 1e-9 * h.norm()).then_some(out)
}

/// Unit normal of every patch around each boundary point, restricted to
/// patches matching `keep`
fn patch_normals(
    engine: &SurfaceEngine,
    areas: &[(Point, Point)],
    bp: usize,
    keep: impl Fn(usize) -> bool,
) -> Vec<(usize, Point)> {
    let mut sums: Vec<(usize, Point)> = vec![];
    for f in engine.point_faces().row(bp) {
        let patch = engine.face_patches()[*f];
        if !keep(patch) {
            continue;
        }
        match sums.iter_mut().find(|(p, _)| *p == patch) {
            Some((_, n)) => *n += areas[*f].0,
            None => sums.push((patch, areas[*f].0)),
        }
    }
    sums.into_iter()
        .filter_map(|(p, n)| n.try_normalize(f64::MIN_POSITIVE).map(|n| (p, n)))
        .collect()
}

/// Extrudes one layer of prisms inwards from the boundary faces of the
/// selected patches
///
/// Every point of a selected face gets a hair pointing into the mesh; all
/// cells switch from the point to the tip of its hair, and a prism fills
/// the gap between each selected face and its copy.  Hairs at the border of
/// the selection are kept in the planes of the neighbouring patches, so the
/// side faces of the border prisms join those patches.  Returns the number
/// of new cells.
pub fn extrude_layer(mesh: &mut PolyMesh, selected: &[bool]) -> Result<usize, Error> {
    let engine = SurfaceEngine::new(mesh);
    let areas = engine.face_geometry(mesh.points());
    let is_selected = |patch: usize| selected.get(patch).copied().unwrap_or(false);
    let layer_faces: Vec<usize> = (0..engine.boundary_faces().len())
        .filter(|f| is_selected(engine.face_patches()[*f]))
        .collect();
    if layer_faces.is_empty() {
        return Ok(0);
    }

    // One hair per point of a selected face
    let mut hair_tip: HashMap<usize, Point> = HashMap::new();
    for f in &layer_faces {
        for p in &engine.boundary_faces()[*f] {
            if hair_tip.contains_key(p) {
                continue;
            }
            let bp = engine.bp(*p).ok_or_else(|| {
                Error::InvalidMesh(format!("point {p} is not on the boundary"))
            })?;
            let inside: Point = patch_normals(&engine, &areas, bp, is_selected)
                .iter()
                .map(|(_, n)| n)
                .sum();
            let others: Vec<Point> = patch_normals(&engine, &areas, bp, |q| !is_selected(q))
                .into_iter()
                .map(|(_, n)| n)
                .collect();
            let row = engine.point_points().row(bp);
            let x = mesh.points()[*p];
            let length = row
                .iter()
                .map(|q| (mesh.points()[engine.boundary_points()[*q]] - x).norm())
                .sum::<f64>()
                / row.len().max(1) as f64
                * HAIR_FRACTION;
            let h = -inside.try_normalize(f64::MIN_POSITIVE).unwrap_or(inside);
            let h = constrain_to_planes(&h, &others)
                .and_then(|h| h.try_normalize(f64::MIN_POSITIVE))
                .unwrap_or(h);
            hair_tip.insert(*p, x + h * length);
        }
    }

    let mut extruded: Vec<usize> = hair_tip.keys().copied().collect();
    extruded.sort_unstable();
    let mut map: HashMap<usize, usize> = HashMap::new();
    for p in &extruded {
        let t = mesh.append_point(hair_tip[p]);
        map.insert(*p, t);
    }
    let lift = |p: &usize| map.get(p).copied().unwrap_or(*p);

    let mut cells: Vec<CellFaces> = mesh
        .to_cell_faces()
        .into_iter()
        .map(|c| {
            c.into_iter()
                .map(|(f, patch)| (f.iter().map(lift).collect(), patch))
                .collect()
        })
        .collect();
    let n_old = cells.len();

    // Boundary edges to the patch of the unselected face across them
    let mut border_patch: HashMap<[usize; 2], usize> = HashMap::new();
    for (f, face) in engine.boundary_faces().iter().enumerate() {
        let patch = engine.face_patches()[f];
        if is_selected(patch) {
            continue;
        }
        for i in 0..face.len() {
            let (a, b) = (face[i], face[(i + 1) % face.len()]);
            border_patch.insert([a.min(b), a.max(b)], patch);
        }
    }

    for f in &layer_faces {
        let bottom = &engine.boundary_faces()[*f];
        let top: Vec<usize> = bottom.iter().map(lift).collect();
        let patch = engine.face_patches()[*f];
        let n = bottom.len();
        let faces = prism_faces(bottom, &top);
        let mut cell: CellFaces = Vec::with_capacity(faces.len());
        for (k, face) in faces.into_iter().enumerate() {
            let p = match k {
                0 => Some(patch),
                1 => None,
                _ => {
                    let i = k - 2;
                    let (a, b) = (bottom[i], bottom[(i + 1) % n]);
                    border_patch.get(&[a.min(b), a.max(b)]).copied()
                }
            };
            cell.push((face, p));
        }
        cells.push(cell);
    }
    let n_new = cells.len() - n_old;

    let map_cells: Vec<Option<usize>> = (0..n_old).map(Some).collect();
    mesh.rebuild(cells, Some(&map_cells), "defaultFaces")?;
    let subsets = mesh.subsets_mut();
    subsets
        .points
        .entry(LAYER_POINTS_SUBSET.to_owned())
        .or_default()
        .extend(extruded.iter().copied());
    subsets
        .cells
        .entry(LAYER_CELLS_SUBSET.to_owned())
        .or_default()
        .extend(n_old..n_old + n_new);
    debug!("extruded {n_new} prisms from {} points", extruded.len());
    Ok(n_new)
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::layers::detect_boundary_layers;
    use crate::mesh::{quality, test::hex_block};
    use approx::assert_relative_eq;

    #[test]
    fn planes() {
        let h = Point::new(1.0, 1.0, 1.0);
        let out = constrain_to_planes(&h, &[Point::z(), Point::new(0.0, 0.0, 2.0)]).unwrap();
        assert_relative_eq!(out, Point::new(1.0, 1.0, 0.0));
        let out = constrain_to_planes(&h, &[Point::z(), Point::y()]).unwrap();
        assert_relative_eq!(out, Point::new(1.0, 0.0, 0.0));
        assert!(constrain_to_planes(&h, &[Point::x(), Point::y(), Point::z()]).is_none());
    }

    /// `hex_block(2)` with its walls split into `bottom` (z = 0) and `sides`
    pub(crate) fn split_block() -> PolyMesh {
        let mut m = hex_block(2);
        let face_patch: Vec<usize> = m
            .boundary_faces()
            .map(|f| {
                let z0 = m.faces()[f].iter().all(|p| m.points()[*p].z == 0.0);
                usize::from(!z0)
            })
            .collect();
        let patches = [
            ("bottom".to_owned(), "wall".to_owned()),
            ("sides".to_owned(), "wall".to_owned()),
        ];
        m.replace_boundary(&patches, &face_patch).unwrap();
        m
    }

    /// [`split_block`] with one layer on its bottom patch
    ///
    /// The hair of point `p` in `0..9` ends at point `27 + p`, at z = 0.4.
    pub(crate) fn bottom_layer_block() -> PolyMesh {
        let mut m = split_block();
        extrude_layer(&mut m, &[true, false]).unwrap();
        m
    }

    #[test]
    fn single_patch() {
        let mut m = split_block();
        let n = extrude_layer(&mut m, &[true, false]).unwrap();
        assert_eq!(n, 4);
        assert_eq!(m.n_cells(), 12);
        assert_eq!(m.n_points(), 27 + 9);
        assert_eq!(m.patches()[0].size, 4);
        assert_eq!(m.patches()[1].size, 20 + 8);

        let (_, vols) = quality::cell_centres_and_volumes(&m);
        assert!(vols.iter().all(|v| *v > 0.0));
        assert_relative_eq!(vols.iter().sum::<f64>(), 8.0, epsilon = 1e-9);

        // Border hairs stay in the side planes
        for p in 0..9 {
            let (b, t) = (m.points()[p], m.points()[27 + p]);
            assert_relative_eq!(t, b + Point::new(0.0, 0.0, 0.4), epsilon = 1e-12);
        }
        let h = detect_boundary_layers(&m);
        assert_eq!(h.cells.len(), 4);
        assert_eq!(h.hairs.len(), 9);
        assert_eq!(h.border.iter().filter(|b| **b).count(), 8);
    }
}
