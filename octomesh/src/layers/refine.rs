//! Splitting of an extruded layer into sub-layers
use super::{
    boundary_layers::patch_groups, detect_boundary_layers, LAYER_CELLS_SUBSET,
    LAYER_POINTS_SUBSET,
};
use crate::{
    config::{BoundaryLayerSettings, LayerParameters},
    mesh::{prism_faces, CellFaces, PolyMesh},
    Error,
};
use log::{debug, info};
use std::collections::HashMap;

/// Returns the ratio `r` for which `n` layers, the first one `first` thick,
/// add up to a unit thickness
fn ratio_for_first_layer(n: usize, first: f64) -> f64 {
    let total = |r: f64| first * (0..n).map(|i| r.powi(i as i32)).sum::<f64>();
    let (mut lo, mut hi) = (0.0, 1.0);
    while total(hi) < 1.0 && hi < 1e6 {
        hi *= 2.0;
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if total(mid) < 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Positions of the `n - 1` interfaces between sub-layers, as fractions of
/// the hair length
///
/// Layer thicknesses follow a geometric progression starting at the wall.
/// If the first layer would be thicker than `max_first`, it is capped and
/// the ratio is raised so the layers still fill the hair.
fn layer_fractions(params: &LayerParameters, length: f64) -> Vec<f64> {
    let n = params.n_layers.max(1);
    let mut r = params.thickness_ratio;
    let mut first = 1.0 / (0..n).map(|i| r.powi(i as i32)).sum::<f64>();
    if let Some(m) = params.max_first_layer_thickness {
        if length > 0.0 && first * length > m {
            first = m / length;
            r = ratio_for_first_layer(n, first);
        }
    }
    let mut out = Vec::with_capacity(n - 1);
    let (mut s, mut t) = (0.0, first);
    for _ in 1..n {
        s += t;
        out.push(s);
        t *= r;
    }
    out
}

/// Inserts the inner points of a hair wherever a face runs along it
fn insert_hair_points(face: &[usize], rows: &HashMap<[usize; 2], &[usize]>) -> Vec<usize> {
    let n = face.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let (a, b) = (face[i], face[(i + 1) % n]);
        out.push(a);
        if let Some(r) = rows.get(&[a, b]) {
            out.extend(&r[1..r.len() - 1]);
        } else if let Some(r) = rows.get(&[b, a]) {
            out.extend(r[1..r.len() - 1].iter().rev());
        }
    }
    out
}

/// Splits the prisms of an extruded layer into the requested number of
/// sub-layers
///
/// Patches whose layers touch are refined together with the largest number
/// of layers requested within the group.  Only layers written by
/// [`extrude_layer`](super::extrude_layer) are refined.  Returns the number
/// of added cells.
pub fn refine_boundary_layers(
    mesh: &mut PolyMesh,
    settings: &BoundaryLayerSettings,
) -> Result<usize, Error> {
    if !mesh.subsets().points.contains_key(LAYER_POINTS_SUBSET) {
        debug!("no extruded layer to refine");
        return Ok(0);
    }
    let hairs = detect_boundary_layers(mesh);
    if hairs.is_empty() {
        return Ok(0);
    }

    let mut layer_patches: Vec<usize> = hairs.cells.iter().map(|c| c.patch).collect();
    layer_patches.sort_unstable();
    layer_patches.dedup();
    let mut params: HashMap<usize, LayerParameters> = HashMap::new();
    for group in patch_groups(mesh, &layer_patches) {
        let Some(p) = group
            .iter()
            .map(|p| settings.for_patch(&mesh.patches()[*p].name))
            .max_by_key(|p| p.n_layers)
        else {
            continue;
        };
        params.extend(group.iter().map(|g| (*g, p)));
    }
    let hair_params = |h: usize| {
        hairs
            .hair_cells
            .row(h)
            .first()
            .and_then(|c| params.get(&hairs.cells[*c].patch))
            .copied()
    };
    if (0..hairs.hairs.len()).all(|h| hair_params(h).is_none_or(|p| p.n_layers <= 1)) {
        return Ok(0);
    }

    // Points along each hair, from bottom to top
    let mut hair_points: Vec<Vec<usize>> = Vec::with_capacity(hairs.hairs.len());
    for (h, [b, t]) in hairs.hairs.iter().enumerate() {
        let mut row = vec![*b];
        if let Some(p) = hair_params(h) {
            let (xb, xt) = (mesh.points()[*b], mesh.points()[*t]);
            for s in layer_fractions(&p, (xt - xb).norm()) {
                row.push(mesh.append_point(xb + (xt - xb) * s));
            }
        }
        row.push(*t);
        hair_points.push(row);
    }
    let rows: HashMap<[usize; 2], &[usize]> = hairs
        .hairs
        .iter()
        .zip(&hair_points)
        .filter(|(_, r)| r.len() > 2)
        .map(|(h, r)| (*h, r.as_slice()))
        .collect();

    let layer_of: HashMap<usize, usize> = hairs
        .cells
        .iter()
        .enumerate()
        .map(|(i, c)| (c.cell, i))
        .collect();
    let old = mesh.to_cell_faces();
    let mut map = vec![None; old.len()];
    let mut cells: Vec<CellFaces> = Vec::with_capacity(old.len());
    let mut added = vec![];
    for (c, faces) in old.into_iter().enumerate() {
        map[c] = Some(cells.len());
        let l = layer_of.get(&c).copied();
        let n = l.map_or(1, |l| hair_points[hairs.cell_hairs[l][0]].len() - 1);
        let Some(l) = l.filter(|_| n > 1) else {
            cells.push(
                faces
                    .into_iter()
                    .map(|(f, p)| (insert_hair_points(&f, &rows), p))
                    .collect(),
            );
            continue;
        };

        let lc = &hairs.cells[l];
        let key = |f: &[usize]| {
            let mut k = f.to_vec();
            k.sort_unstable();
            k
        };
        let patch_of: HashMap<Vec<usize>, Option<usize>> =
            faces.iter().map(|(f, p)| (key(f), *p)).collect();
        let m = lc.bottom.len();
        let top_patch = patch_of.get(&key(&lc.top)).copied().flatten();
        let side_patch: Vec<Option<usize>> = (0..m)
            .map(|i| {
                let j = (i + 1) % m;
                let side = [lc.bottom[i], lc.bottom[j], lc.top[j], lc.top[i]];
                patch_of.get(&key(&side)).copied().flatten()
            })
            .collect();
        let layer_rows: Vec<&[usize]> = hairs.cell_hairs[l]
            .iter()
            .map(|h| hair_points[*h].as_slice())
            .collect();
        for k in 0..n {
            let bottom: Vec<usize> = layer_rows.iter().map(|r| r[k]).collect();
            let top: Vec<usize> = layer_rows.iter().map(|r| r[k + 1]).collect();
            let cell = prism_faces(&bottom, &top)
                .into_iter()
                .enumerate()
                .map(|(i, f)| {
                    let p = match i {
                        0 => (k == 0).then_some(lc.patch),
                        1 => top_patch.filter(|_| k + 1 == n),
                        _ => side_patch[i - 2],
                    };
                    (f, p)
                })
                .collect();
            if k > 0 {
                added.push(cells.len());
            }
            cells.push(cell);
        }
    }

    mesh.rebuild(cells, Some(&map), "defaultFaces")?;
    mesh.subsets_mut()
        .cells
        .entry(LAYER_CELLS_SUBSET.to_owned())
        .or_default()
        .extend(added.iter().copied());
    info!(
        "refined {} layer cells into {} prisms",
        hairs.cells.len(),
        hairs.cells.len() + added.len()
    );
    Ok(added.len())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::PatchLayers;
    use crate::layers::extrude::test::{bottom_layer_block, split_block};
    use crate::mesh::quality;
    use approx::assert_relative_eq;

    fn check_volumes(m: &PolyMesh) {
        let (_, vols) = quality::cell_centres_and_volumes(m);
        assert!(vols.iter().all(|v| *v > 0.0));
        assert_relative_eq!(vols.iter().sum::<f64>(), 8.0, epsilon = 1e-9);
    }

    #[test]
    fn fractions() {
        let p = LayerParameters {
            n_layers: 3,
            thickness_ratio: 2.0,
            max_first_layer_thickness: None,
        };
        let f = layer_fractions(&p, 1.0);
        assert_relative_eq!(f[0], 1.0 / 7.0);
        assert_relative_eq!(f[1], 3.0 / 7.0);

        // A capped first layer raises the ratio
        let p = LayerParameters {
            max_first_layer_thickness: Some(0.05),
            ..p
        };
        let r = (29f64.sqrt() - 1.0) / 2.0;
        let f = layer_fractions(&p, 0.4);
        assert_relative_eq!(f[0], 0.125, epsilon = 1e-9);
        assert_relative_eq!(f[1], 0.125 * (1.0 + r), epsilon = 1e-9);
    }

    #[test]
    fn uniform_layers() {
        let mut m = bottom_layer_block();
        let settings = BoundaryLayerSettings {
            n_layers: 3,
            ..BoundaryLayerSettings::default()
        };
        assert_eq!(refine_boundary_layers(&mut m, &settings).unwrap(), 8);
        assert_eq!(m.n_cells(), 20);
        assert_eq!(m.n_points(), 36 + 18);
        assert_eq!(m.subsets().cells[LAYER_CELLS_SUBSET].len(), 12);
        assert_eq!(m.patches()[0].size, 4);
        check_volumes(&m);

        let z: Vec<f64> = m.points()[36..].iter().map(|p| p.z).collect();
        for (i, z) in z.iter().enumerate() {
            let expected = if i % 2 == 0 { 0.4 / 3.0 } else { 0.8 / 3.0 };
            assert_relative_eq!(*z, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn patch_override() {
        let mut m = bottom_layer_block();
        let settings = BoundaryLayerSettings {
            n_layers: 1,
            patch_layers: vec![PatchLayers {
                patch: "bottom".to_owned(),
                n_layers: Some(2),
                thickness_ratio: Some(3.0),
                max_first_layer_thickness: None,
            }],
            ..BoundaryLayerSettings::default()
        };
        assert_eq!(refine_boundary_layers(&mut m, &settings).unwrap(), 4);
        check_volumes(&m);
        // One inner point per hair, a quarter of the way up
        assert_eq!(m.n_points(), 36 + 9);
        for p in &m.points()[36..] {
            assert_relative_eq!(p.z, 0.1, epsilon = 1e-12);
        }
    }

    #[test]
    fn nothing_to_refine() {
        let settings = BoundaryLayerSettings {
            n_layers: 3,
            ..BoundaryLayerSettings::default()
        };
        let mut m = split_block();
        assert_eq!(refine_boundary_layers(&mut m, &settings).unwrap(), 0);
        assert_eq!(m.n_cells(), 8);

        let mut m = bottom_layer_block();
        let one = BoundaryLayerSettings::default();
        assert_eq!(refine_boundary_layers(&mut m, &one).unwrap(), 0);
        assert_eq!(m.n_cells(), 12);
    }
}
