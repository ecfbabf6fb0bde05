//! Per-patch selection of walls which receive boundary layers
use super::extrude::extrude_layer;
use crate::{config::BoundaryLayerSettings, mesh::PolyMesh, Error};
use log::info;
use std::collections::BTreeMap;

/// Adds prism layers to the walls of a mesh
pub struct BoundaryLayers<'a> {
    mesh: &'a mut PolyMesh,
    settings: BoundaryLayerSettings,
}

impl<'a> BoundaryLayers<'a> {
    /// Builds a layer generator for the given mesh
    pub fn new(mesh: &'a mut PolyMesh, settings: &BoundaryLayerSettings) -> Self {
        Self {
            mesh,
            settings: settings.clone(),
        }
    }

    /// Groups patches which share boundary points
    ///
    /// Layers on patches of one group share their hairs, so they have to be
    /// extruded (and later refined) together.  Only the given patches are
    /// considered; each group is sorted.
    pub fn find_patches_to_be_treated_together(&self, patches: &[usize]) -> Vec<Vec<usize>> {
        patch_groups(self.mesh, patches)
    }

    /// Adds a layer on a single patch, returning the number of new cells
    pub fn add_layer_for_patch(&mut self, name: &str) -> Result<usize, Error> {
        self.add_layer_for_patches(&[name])
    }

    /// Adds one layer on every named patch at once
    pub fn add_layer_for_patches(&mut self, names: &[&str]) -> Result<usize, Error> {
        let mut selected = vec![false; self.mesh.patches().len()];
        for name in names {
            let p = self
                .mesh
                .patch_index(name)
                .ok_or_else(|| Error::UnknownPatch(name.to_string()))?;
            if self.mesh.patches()[p].kind == "empty" {
                return Err(Error::BadConfig(
                    "boundary_layers",
                    format!("patch `{name}` is empty and cannot carry a layer"),
                ));
            }
            selected[p] = true;
        }
        let patches: Vec<usize> = (0..selected.len()).filter(|p| selected[*p]).collect();
        let groups = self.find_patches_to_be_treated_together(&patches);
        let n = extrude_layer(self.mesh, &selected)?;
        info!(
            "added {n} layer cells on {} patches in {} groups",
            patches.len(),
            groups.len()
        );
        Ok(n)
    }

    /// Adds a layer on every patch which asks for at least one layer
    pub fn add_layer_for_all_patches(&mut self) -> Result<usize, Error> {
        let names: Vec<String> = self
            .mesh
            .patches()
            .iter()
            .filter(|p| p.kind != "empty" && self.settings.for_patch(&p.name).n_layers > 0)
            .map(|p| p.name.clone())
            .collect();
        if names.is_empty() {
            return Ok(0);
        }
        let names: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        self.add_layer_for_patches(&names)
    }
}

/// Union-find over the patches sharing a boundary point
pub(crate) fn patch_groups(mesh: &PolyMesh, patches: &[usize]) -> Vec<Vec<usize>> {
    let mut parent: BTreeMap<usize, usize> = patches.iter().map(|p| (*p, *p)).collect();
    fn find(parent: &mut BTreeMap<usize, usize>, mut p: usize) -> usize {
        while parent[&p] != p {
            let up = parent[&parent[&p]];
            parent.insert(p, up);
            p = up;
        }
        p
    }
    let pf = mesh.point_faces();
    for p in 0..mesh.n_points() {
        let around: Vec<usize> = pf
            .row(p)
            .iter()
            .filter_map(|f| mesh.face_patch(*f))
            .filter(|q| parent.contains_key(q))
            .collect();
        for w in around.windows(2) {
            let (a, b) = (find(&mut parent, w[0]), find(&mut parent, w[1]));
            if a != b {
                parent.insert(a.max(b), a.min(b));
            }
        }
    }
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for p in patches {
        let root = find(&mut parent, *p);
        groups.entry(root).or_default().push(*p);
    }
    groups
        .into_values()
        .map(|mut g| {
            g.sort_unstable();
            g.dedup();
            g
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::layers::{detect_boundary_layers, LAYER_CELLS_SUBSET};
    use crate::mesh::{quality, test::hex_block};
    use approx::assert_relative_eq;

    /// Block with one patch per side, in `xMin, xMax, yMin, ...` order
    pub(crate) fn sided_block(n: usize) -> PolyMesh {
        let mut m = hex_block(n);
        let names = ["xMin", "xMax", "yMin", "yMax", "zMin", "zMax"];
        let face_patch: Vec<usize> = m
            .boundary_faces()
            .map(|f| {
                let pts: Vec<_> = m.faces()[f].iter().map(|p| m.points()[*p]).collect();
                let (a, _) = crate::geom::polygon_normal_and_centre(&pts);
                let axis = a.iamax();
                2 * axis + usize::from(a[axis] > 0.0)
            })
            .collect();
        let patches: Vec<(String, String)> = names
            .iter()
            .map(|n| (n.to_string(), "wall".to_owned()))
            .collect();
        m.replace_boundary(&patches, &face_patch).unwrap();
        m
    }

    #[test]
    fn groups() {
        let mut m = sided_block(2);
        let layers = BoundaryLayers::new(&mut m, &BoundaryLayerSettings::default());
        // xMin and xMax never touch; yMin touches both
        assert_eq!(layers.find_patches_to_be_treated_together(&[0, 1]).len(), 2);
        assert_eq!(
            layers.find_patches_to_be_treated_together(&[0, 1, 2]),
            vec![vec![0, 1, 2]]
        );
    }

    #[test]
    fn all_patches() {
        let mut m = sided_block(2);
        let settings = BoundaryLayerSettings {
            n_layers: 1,
            ..BoundaryLayerSettings::default()
        };
        let n = BoundaryLayers::new(&mut m, &settings)
            .add_layer_for_all_patches()
            .unwrap();
        assert_eq!(n, 24);
        assert_eq!(m.n_cells(), 32);
        assert_eq!(m.subsets().cells[LAYER_CELLS_SUBSET].len(), 24);
        let (_, vols) = quality::cell_centres_and_volumes(&m);
        assert!(vols.iter().all(|v| *v > 0.0));
        assert_relative_eq!(vols.iter().sum::<f64>(), 8.0, epsilon = 1e-9);
        assert_eq!(detect_boundary_layers(&m).cells.len(), 24);
    }

    #[test]
    fn unknown_patch() {
        let mut m = sided_block(1);
        let mut layers = BoundaryLayers::new(&mut m, &BoundaryLayerSettings::default());
        assert!(matches!(
            layers.add_layer_for_patch("inlet"),
            Err(Error::UnknownPatch(_))
        ));
        assert_eq!(layers.add_layer_for_patch("zMin").unwrap(), 1);
    }
}
