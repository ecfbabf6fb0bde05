//! Extraction of mesh templates from a classified octree
//!
//! Each extractor reads an [`OctreeAddressing`](crate::octree::OctreeAddressing)
//! and produces a [`PolyMesh`](crate::mesh::PolyMesh) whose boundary is the
//! stair-stepped hull of the mesh cells.  The template is later projected to
//! the surface by the [`mapping`](crate::mapping) stage.
mod cartesian;
mod tet;
mod voronoi;

pub use cartesian::CartesianExtractor;
pub use tet::{TetExtractor, TetMesh};
pub use voronoi::VoronoiExtractor;

/// Patch holding every boundary face of a fresh template
pub const DEFAULT_PATCH: &str = "defaultFaces";

/// Patch holding the lower faces of a 2D template
pub const BOTTOM_EMPTY_PATCH: &str = "bottomEmptyFaces";

/// Patch holding the upper faces of a 2D template
pub const TOP_EMPTY_PATCH: &str = "topEmptyFaces";

#[cfg(test)]
pub(crate) mod test {
    use crate::comm::SerialComm;
    use crate::octree::{test::sphere_octree, InsideOutside, Octree};

    /// Unit sphere in a `[-2, 2]` box, uniformly refined and classified
    pub(crate) fn classified_sphere(levels: u8) -> Octree {
        let mut o = sphere_octree(levels);
        InsideOutside::new(&mut o, &SerialComm).run().unwrap();
        o
    }
}
