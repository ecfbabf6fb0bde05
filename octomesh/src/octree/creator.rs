//! Construction of a refined, classified octree from a surface and a
//! mesh dictionary
use super::{
    coordinates::MAX_LEVEL,
    cube::CubeType,
    inside_outside::{Classification, InsideOutside},
    modifier::OctreeModifier,
    refinement::AutomaticRefinement,
    Octree,
};
use crate::{
    comm::Communicator,
    config::{to_point, MeshDict, ObjectRefinement},
    geom::{BoundBox, Point},
    surface::TriSurface,
    Error,
};
use log::{debug, info, warn};
use std::sync::Arc;

/// Relative slack when comparing cell sizes, so that a requested size that
/// is exactly representable does not trigger one more level
const SIZE_TOLERANCE: f64 = 1e-6;

/// Refines the marked leaves, in parallel when the tree is distributed
///
/// Returns the number of leaves refined over all ranks.
pub(crate) fn refine_marked<C: Communicator>(
    octree: &mut Octree,
    refine: &mut [bool],
    hex_refinement: bool,
    comm: &C,
) -> Result<usize, Error> {
    let distributed = octree.n_procs() > 1;
    let mut m = OctreeModifier::new(octree);
    if distributed {
        let n = m.refine_selected_boxes_parallel(refine, hex_refinement, comm)?;
        comm.all_reduce_sum(n)
    } else {
        Ok(m.refine_selected_boxes(refine, hex_refinement))
    }
}

/// Root box and refinement levels derived from the dictionary
#[derive(Clone, Debug)]
pub struct RefinementParameters {
    /// Bounds of the root cube
    pub root: BoundBox,
    /// Level at which leaves reach `max_cell_size`
    pub global_level: u8,
    /// Level at which leaves reach `boundary_cell_size`
    pub boundary_level: u8,
    /// Required level of every surface facet
    pub facet_levels: Vec<u8>,
    /// Level required in leaves holding feature edges
    pub feature_edge_level: Option<u8>,
}

/// Builds an octree for a surface
///
/// The passes run in a fixed order: uniform refinement to the maximum cell
/// size, refinement at the surface (per patch), at feature edges, in a band
/// around the surface, inside user objects, automatic refinement, and finally
/// inside/outside classification.
pub struct OctreeCreator<'a> {
    surface: Arc<TriSurface>,
    dict: &'a MeshDict,
    quadtree: bool,
}

impl<'a> OctreeCreator<'a> {
    /// Prepares a creator for a 3D octree
    pub fn new(surface: Arc<TriSurface>, dict: &'a MeshDict) -> Self {
        Self {
            surface,
            dict,
            quadtree: false,
        }
    }

    /// Prepares a creator for a quadtree in the `x-y` plane
    pub fn new_2d(surface: Arc<TriSurface>, dict: &'a MeshDict) -> Self {
        Self {
            surface,
            dict,
            quadtree: true,
        }
    }

    /// Returns the level at which a root of `root_size` reaches `size`
    fn level_for_size(root_size: f64, size: f64) -> Result<u8, Error> {
        let ratio = root_size / (size * (1.0 + SIZE_TOLERANCE));
        let level = if ratio <= 1.0 { 0 } else { ratio.log2().ceil() as usize };
        if level > MAX_LEVEL as usize {
            Err(Error::LevelTooDeep(level, MAX_LEVEL))
        } else {
            Ok(level as u8)
        }
    }

    /// Picks the root box and the refinement levels
    ///
    /// The root is the smallest cube of side `max_cell_size · 2^L` centred on
    /// the surface bounding box, so leaves at level `L` have exactly the
    /// requested maximum size.
    pub fn set_root_cube_size_and_ref_parameters(&self) -> Result<RefinementParameters, Error> {
        let dict = self.dict;
        let max_size = dict.max_cell_size()?;
        let bb = self.surface.bounding_box();
        let span = bb.span();
        let side = if self.quadtree { span.x.max(span.y) } else { span.max() };
        let global_level = Self::level_for_size(side, max_size)?;
        let root_size = max_size * (1u64 << global_level) as f64;

        let c = bb.centre();
        let h = root_size / 2.0;
        let mut root = BoundBox::new(c - Point::repeat(h), c + Point::repeat(h));
        if self.quadtree {
            root.min.z = bb.min.z;
            root.max.z = bb.max.z;
        }

        let boundary_level =
            Self::level_for_size(root_size, dict.boundary_cell_size()?)?.max(global_level);
        let mut patch_levels = vec![boundary_level; self.surface.patches().len()];
        for p in &dict.patch_refinement {
            let i = self
                .surface
                .patch_index(&p.patch)
                .ok_or_else(|| Error::UnknownPatch(p.patch.clone()))?;
            patch_levels[i] = Self::level_for_size(root_size, p.cell_size)?.max(global_level);
        }
        let facet_levels = self
            .surface
            .facets()
            .iter()
            .map(|f| patch_levels[f.patch])
            .collect();
        let feature_edge_level = dict
            .feature_edge_cell_size
            .map(|s| Self::level_for_size(root_size, s))
            .transpose()?;

        debug!(
            "root box {:?} .. {:?}; global level {global_level}, boundary level \
             {boundary_level}",
            root.min, root.max
        );
        Ok(RefinementParameters {
            root,
            global_level,
            boundary_level,
            facet_levels,
            feature_edge_level,
        })
    }

    /// Builds, refines and classifies the octree
    pub fn create_octree<C: Communicator>(&self, comm: &C) -> Result<Octree, Error> {
        let params = self.set_root_cube_size_and_ref_parameters()?;
        self.check_watertight()?;
        let mut octree = Octree::new(self.surface.clone(), params.root, self.quadtree);
        self.refine_to_global_level(&mut octree, &params);

        if comm.is_parallel() {
            OctreeModifier::new(&mut octree).distribute_leaves_to_processors(comm)?;
        }

        self.refine_boundary(&mut octree, &params, comm)?;
        self.refine_boxes_intersecting_edges(&mut octree, &params, comm)?;
        self.refine_boxes_near_data_boxes(&mut octree, &params, comm)?;
        self.refine_boxes_in_objects(&mut octree, &params, comm)?;
        AutomaticRefinement::new(&mut octree, self.dict, comm)?.automatic_refinement()?;

        if comm.is_parallel() {
            OctreeModifier::new(&mut octree).load_distribution(comm)?;
        }

        let c = self.classify(&mut octree, comm)?;
        info!(
            "octree has {} leaves ({} inside, {} boundary) at levels up to {}",
            octree.n_leaves(),
            c.n_inside,
            c.n_data,
            octree.max_leaf_level()
        );
        Ok(octree)
    }

    /// Runs inside/outside classification
    pub fn classify<C: Communicator>(
        &self,
        octree: &mut Octree,
        comm: &C,
    ) -> Result<Classification, Error> {
        InsideOutside::new(octree, comm).run()
    }

    /// Rejects or warns about open surfaces
    fn check_watertight(&self) -> Result<(), Error> {
        if self.quadtree {
            // Extruded 2D profiles are open at both ends
            return Ok(());
        }
        let open = self.surface.open_edges().len();
        if open > 0 {
            if self.dict.check_watertight {
                return Err(Error::NonWatertightSurface(open));
            }
            warn!("surface has {open} open edges; inside/outside detection may leak");
        }
        Ok(())
    }

    /// Refines every leaf uniformly up to the global level
    ///
    /// This runs before distribution, so every rank builds the same tree.
    fn refine_to_global_level(&self, octree: &mut Octree, params: &RefinementParameters) {
        let mut m = OctreeModifier::new(octree);
        for _ in 0..params.global_level {
            let mut refine = vec![true; m.octree().n_leaves()];
            m.refine_selected_boxes(&mut refine, false);
        }
    }

    /// Refines leaves at the surface until each reaches the level required
    /// by the facets it holds
    pub fn refine_boundary<C: Communicator>(
        &self,
        octree: &mut Octree,
        params: &RefinementParameters,
        comm: &C,
    ) -> Result<usize, Error> {
        self.refine_until(octree, comm, "boundary", |o, l| {
            let required = o
                .leaf_elements(l)
                .iter()
                .map(|f| params.facet_levels[*f])
                .max()
                .unwrap_or(0);
            o.leaf_level(l) < required
        })
    }

    /// Refines leaves holding feature edges to the feature edge level
    pub fn refine_boxes_intersecting_edges<C: Communicator>(
        &self,
        octree: &mut Octree,
        params: &RefinementParameters,
        comm: &C,
    ) -> Result<usize, Error> {
        let Some(level) = params.feature_edge_level else {
            return Ok(0);
        };
        self.refine_until(octree, comm, "feature edge", |o, l| {
            !o.leaf_edges(l).is_empty() && o.leaf_level(l) < level
        })
    }

    /// Refines leaves near the surface to the boundary level
    ///
    /// Leaves within `boundary_cell_size_refinement_thickness` of the surface,
    /// plus one ring of neighbours around the DATA leaves, are refined so
    /// that the size transition away from the surface is gradual.
    pub fn refine_boxes_near_data_boxes<C: Communicator>(
        &self,
        octree: &mut Octree,
        params: &RefinementParameters,
        comm: &C,
    ) -> Result<usize, Error> {
        let thickness = self.dict.boundary_cell_size_refinement_thickness;
        let level = params.boundary_level;
        if level <= params.global_level {
            return Ok(0);
        }
        let mut total = 0;
        loop {
            let o = &*octree;
            let mut refine = vec![false; o.n_leaves()];
            for l in (0..o.n_leaves()).filter(|l| o.is_owned(*l)) {
                if o.leaf_level(l) >= level {
                    continue;
                }
                if o.leaf(l).has_elements() {
                    refine[l] = true;
                } else if thickness > 0.0 {
                    let half_diag = o.leaf_size(l) * 3f64.sqrt() / 2.0;
                    let centre = o.leaf_centre(l);
                    if let Some(n) = o.find_nearest_surface_point(&centre) {
                        refine[l] = n.distance_squared.sqrt() - half_diag < thickness;
                    }
                }
            }
            // One ring of coarser neighbours around the marked leaves
            let m = OctreeModifier::new(octree);
            if m.octree().n_procs() > 1 {
                m.mark_additional_layers_parallel(&mut refine, 1, comm)?;
            } else {
                m.mark_additional_layers(&mut refine, 1);
            }
            let o = m.octree();
            for l in 0..o.n_leaves() {
                if refine[l] && (o.leaf_level(l) >= level || !o.is_owned(l)) {
                    refine[l] = false;
                }
            }
            let n = refine_marked(octree, &mut refine, self.dict.hex_refinement, comm)?;
            if n == 0 {
                break;
            }
            total += n;
        }
        debug!("refined {total} leaves near the surface");
        Ok(total)
    }

    /// Refines leaves inside the dictionary's boxes and spheres
    pub fn refine_boxes_in_objects<C: Communicator>(
        &self,
        octree: &mut Octree,
        params: &RefinementParameters,
        comm: &C,
    ) -> Result<usize, Error> {
        let root_size = params.root.span().x;
        let mut total = 0;
        for obj in &self.dict.object_refinements {
            let level = Self::level_for_size(root_size, obj.cell_size())?;
            loop {
                let o = &*octree;
                let mut refine = vec![false; o.n_leaves()];
                match obj {
                    ObjectRefinement::Box { min, max, .. } => {
                        let bb = BoundBox::new(to_point(min), to_point(max));
                        for l in o.leaves_in_box(&bb) {
                            refine[l] = true;
                        }
                    }
                    ObjectRefinement::Sphere { centre, radius, .. } => {
                        o.mark_leaves_in_sphere(&to_point(centre), *radius, &mut refine);
                    }
                }
                for l in 0..o.n_leaves() {
                    if refine[l] && (o.leaf_level(l) >= level || !o.is_owned(l)) {
                        refine[l] = false;
                    }
                }
                let n = refine_marked(octree, &mut refine, self.dict.hex_refinement, comm)?;
                if n == 0 {
                    break;
                }
                total += n;
            }
        }
        if total > 0 {
            debug!("refined {total} leaves inside refinement objects");
        }
        Ok(total)
    }

    /// Repeats a marking pass until no owned leaf is marked on any rank
    fn refine_until<C: Communicator, F: Fn(&Octree, usize) -> bool>(
        &self,
        octree: &mut Octree,
        comm: &C,
        what: &str,
        mark: F,
    ) -> Result<usize, Error> {
        let mut total = 0;
        loop {
            let o = &*octree;
            let mut refine: Vec<bool> = (0..o.n_leaves())
                .map(|l| o.is_owned(l) && o.leaf_type(l) != CubeType::Outside && mark(o, l))
                .collect();
            let n = refine_marked(octree, &mut refine, self.dict.hex_refinement, comm)?;
            if n == 0 {
                break;
            }
            total += n;
        }
        debug!("{what} refinement: refined {total} leaves");
        Ok(total)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::{LocalCluster, SerialComm};
    use crate::surface::{box_surface, sphere_surface};
    use approx::assert_relative_eq;

    #[test]
    fn unit_cube_gives_eight_data_leaves() {
        let bb = BoundBox::new(Point::zeros(), Point::repeat(1.0));
        let s = Arc::new(box_surface(&bb));
        let dict = MeshDict::with_max_cell_size(0.5);
        let creator = OctreeCreator::new(s, &dict);
        let p = creator.set_root_cube_size_and_ref_parameters().unwrap();
        assert_eq!(p.global_level, 1);
        assert_relative_eq!(p.root.span().x, 1.0);

        let o = creator.create_octree(&SerialComm).unwrap();
        assert_eq!(o.n_leaves(), 8);
        for l in 0..8 {
            assert_eq!(o.leaf_level(l), 1);
            assert_eq!(o.leaf_type(l), CubeType::Data);
        }
    }

    #[test]
    fn boundary_refinement_levels() {
        let s = Arc::new(sphere_surface(Point::zeros(), 1.0, 2));
        let dict = MeshDict {
            boundary_cell_size: Some(0.25),
            ..MeshDict::with_max_cell_size(1.0)
        };
        let o = OctreeCreator::new(s, &dict).create_octree(&SerialComm).unwrap();
        let p_level = o.max_leaf_level();
        assert_eq!(p_level, 3);
        for l in 0..o.n_leaves() {
            if o.leaf(l).has_elements() {
                assert_eq!(o.leaf_level(l), 3);
            }
        }
    }

    #[test]
    fn unknown_patch_is_fatal() {
        let s = Arc::new(sphere_surface(Point::zeros(), 1.0, 1));
        let dict = MeshDict {
            patch_refinement: vec![crate::config::PatchRefinement {
                patch: "nope".to_owned(),
                cell_size: 0.1,
            }],
            ..MeshDict::with_max_cell_size(1.0)
        };
        let r = OctreeCreator::new(s, &dict).set_root_cube_size_and_ref_parameters();
        assert!(matches!(r, Err(Error::UnknownPatch(p)) if p == "nope"));
    }

    #[test]
    fn watertight_check() {
        let s = Arc::new(crate::surface::extruded_polygon(
            &[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            0.0,
            1.0,
        ));
        let dict = MeshDict {
            check_watertight: true,
            ..MeshDict::with_max_cell_size(0.5)
        };
        let r = OctreeCreator::new(s.clone(), &dict).create_octree(&SerialComm);
        assert!(matches!(r, Err(Error::NonWatertightSurface(8))));

        // The same surface is fine as a 2D profile
        let o = OctreeCreator::new_2d(s, &dict).create_octree(&SerialComm).unwrap();
        assert!(o.is_quadtree());
        assert_eq!(o.n_leaves(), 4);
    }

    #[test]
    fn object_refinement() {
        let s = Arc::new(sphere_surface(Point::zeros(), 1.0, 1));
        let dict = MeshDict {
            object_refinements: vec![ObjectRefinement::Sphere {
                centre: [0.0; 3],
                radius: 0.1,
                cell_size: 0.125,
            }],
            ..MeshDict::with_max_cell_size(0.5)
        };
        let o = OctreeCreator::new(s, &dict).create_octree(&SerialComm).unwrap();
        let l = o.find_leaf_containing_vertex(&Point::repeat(0.01)).unwrap();
        assert_relative_eq!(o.leaf_size(l), 0.125);
    }

    #[test]
    fn parallel_creation_matches_serial() {
        let s = Arc::new(sphere_surface(Point::zeros(), 1.0, 2));
        let dict = MeshDict {
            boundary_cell_size: Some(0.25),
            ..MeshDict::with_max_cell_size(0.5)
        };
        let serial = OctreeCreator::new(s.clone(), &dict)
            .create_octree(&SerialComm)
            .unwrap();
        let counts = LocalCluster::run(2, |comm| {
            let o = OctreeCreator::new(s.clone(), &dict).create_octree(comm).unwrap();
            (0..o.n_leaves()).filter(|l| o.is_owned(*l)).count()
        });
        assert_eq!(counts.iter().sum::<usize>(), serial.n_leaves());
    }
}
