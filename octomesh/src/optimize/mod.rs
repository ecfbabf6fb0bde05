//! Geometric optimisation of meshes
//!
//! Optimisation never changes the topology: it only moves points.  The
//! building block is a *simplex*, the ring of tetrahedra
//! ([`TetSimplex`]) or surface triangles ([`TriSimplex`]) around one free
//! vertex, which one of the [`SimplexSmoother`] strategies relocates.  The
//! drivers ([`MeshOptimizer`], [`MeshSurfaceOptimizer`]) decide which
//! vertices are free and run the smoothers over colour groups of points that
//! never share a simplex, so every group is smoothed in parallel.
//!
//! ```
//! use octomesh::optimize::{tet_quality, SimplexSmoother, TetSimplex};
//! use octomesh::geom::Point;
//!
//! // One tetrahedron whose free vertex sits on the wrong side of its base
//! let ring = vec![Point::zeros(), Point::x(), Point::y()];
//! let mut s = TetSimplex::new(ring, Point::new(0.2, 0.2, -0.5), &[[0, 1, 2]]);
//! assert!(!s.is_valid_at(&s.position()));
//!
//! assert!(SimplexSmoother::MeshUntangler.optimize_node_position(&mut s, 1e-6));
//! let [a, b, c] = [0, 1, 2].map(|i| s.points[i]);
//! assert!(tet_quality(&a, &b, &c, &s.position()) > 0.0);
//! ```
mod laplace;
mod mesh_optimizer;
mod part_tet;
mod part_tri;
pub(crate) mod simplex;
mod smoother;
mod surface_optimizer;
mod untangler;

pub use laplace::LaplaceSmoother;
pub use mesh_optimizer::{MeshOptimizer, BAD_POINTS_SUBSET};
pub use part_tet::PartTetMesh;
pub use part_tri::{PartTriMesh, TangentFrame};
pub use simplex::{tet_quality, TetSimplex, TriSimplex};
pub use smoother::SimplexSmoother;
pub use surface_optimizer::MeshSurfaceOptimizer;
