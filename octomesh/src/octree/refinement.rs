//! Refinement driven by the surface geometry itself
use super::{creator::refine_marked, Octree};
use crate::{comm::Communicator, config::MeshDict, Error};
use log::{debug, info};
use std::collections::BTreeMap;

/// Curvature and proximity driven refinement
///
/// Both tests only look at DATA leaves; refinement stops at the level
/// matching `min_cell_size`, so without that entry nothing happens.
pub struct AutomaticRefinement<'a, C: Communicator> {
    octree: &'a mut Octree,
    dict: &'a MeshDict,
    comm: &'a C,
    max_level: Option<u8>,
}

impl<'a, C: Communicator> AutomaticRefinement<'a, C> {
    /// Prepares automatic refinement of an octree
    pub fn new(octree: &'a mut Octree, dict: &'a MeshDict, comm: &'a C) -> Result<Self, Error> {
        let root_size = octree.root_box().bb.span().x;
        let max_level = match dict.min_cell_size {
            Some(s) => {
                let mut level = 0;
                while root_size / (1u64 << level) as f64 > s * (1.0 + 1e-6) {
                    level += 1;
                    if level > super::MAX_LEVEL {
                        return Err(Error::LevelTooDeep(level as usize, super::MAX_LEVEL));
                    }
                }
                Some(level)
            }
            None => None,
        };
        Ok(Self {
            octree,
            dict,
            comm,
            max_level,
        })
    }

    /// Runs the enabled refinement criteria until no leaf needs refining
    ///
    /// Returns the number of refined leaves over all ranks.
    pub fn automatic_refinement(&mut self) -> Result<usize, Error> {
        if self.max_level.is_none() {
            return Ok(0);
        }
        let mut total = 0;
        if self.dict.curvature_refinement {
            total += self.curvature_refinement()?;
        }
        if self.dict.proximity_refinement {
            total += self.proximity_refinement()?;
        }
        if total > 0 {
            info!("automatic refinement: refined {total} leaves");
        }
        Ok(total)
    }

    /// Refines DATA leaves where the surface bends more than the curvature
    /// angle
    pub fn curvature_refinement(&mut self) -> Result<usize, Error> {
        let cos = self.dict.curvature_angle.to_radians().cos();
        self.refine_until("curvature", |o, l| {
            let surf = o.surface();
            let facets = o.leaf_elements(l);
            // Compare normals within a patch only; patch boundaries are sharp
            // by construction
            facets.iter().enumerate().any(|(i, a)| {
                let na = surf.facet_normal(*a);
                facets[i + 1..].iter().any(|b| {
                    surf.facets()[*a].patch == surf.facets()[*b].patch
                        && na.dot(&surf.facet_normal(*b)) < cos
                })
            })
        })
    }

    /// Refines DATA leaves holding two facing sheets of the surface
    ///
    /// The facets of a leaf are split into sheets connected through shared
    /// edges; a leaf holding two sheets with opposing facets sits in a gap
    /// narrower than itself.
    pub fn proximity_refinement(&mut self) -> Result<usize, Error> {
        self.refine_until("proximity", |o, l| {
            let surf = o.surface();
            let sheets = sheets(o, l);
            sheets.iter().enumerate().any(|(i, a)| {
                sheets[i + 1..].iter().any(|b| {
                    a.iter().any(|fa| {
                        let na = surf.facet_normal(*fa);
                        b.iter().any(|fb| na.dot(&surf.facet_normal(*fb)) < -0.5)
                    })
                })
            })
        })
    }

    fn refine_until<F: Fn(&Octree, usize) -> bool>(
        &mut self,
        what: &str,
        needs_refinement: F,
    ) -> Result<usize, Error> {
        let Some(max_level) = self.max_level else {
            return Ok(0);
        };
        let mut total = 0;
        loop {
            let o = &*self.octree;
            let mut refine: Vec<bool> = (0..o.n_leaves())
                .map(|l| {
                    o.is_owned(l)
                        && o.leaf(l).has_elements()
                        && o.leaf_level(l) < max_level
                        && needs_refinement(o, l)
                })
                .collect();
            let n = refine_marked(self.octree, &mut refine, self.dict.hex_refinement, self.comm)?;
            if n == 0 {
                break;
            }
            total += n;
            debug!("{what} refinement: refined {n} leaves");
        }
        Ok(total)
    }
}

/// Splits the facets of a leaf into edge-connected sheets
fn sheets(o: &Octree, leaf: usize) -> Vec<Vec<usize>> {
    let surf = o.surface();
    let facets = o.leaf_elements(leaf);
    let local: BTreeMap<usize, usize> =
        facets.iter().enumerate().map(|(i, f)| (*f, i)).collect();
    let mut seen = vec![false; facets.len()];
    let mut out = vec![];
    for seed in 0..facets.len() {
        if seen[seed] {
            continue;
        }
        let mut sheet = vec![];
        let mut stack = vec![seed];
        seen[seed] = true;
        while let Some(i) = stack.pop() {
            let f = facets[i];
            sheet.push(f);
            for e in surf.facet_edges()[f] {
                for g in surf.edge_facets().row(e) {
                    if let Some(&j) = local.get(g) {
                        if !seen[j] {
                            seen[j] = true;
                            stack.push(j);
                        }
                    }
                }
            }
        }
        out.push(sheet);
    }
    out
}
