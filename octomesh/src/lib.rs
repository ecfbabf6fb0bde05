//! Octomesh is a library for automatic generation of volume meshes from
//! triangulated surfaces.
//!
//! The input is a closed [`TriSurface`](crate::surface::TriSurface) (read from
//! STL or built from one of the shape helpers) together with a
//! [`MeshDict`](crate::config::MeshDict) of meshing parameters.  Meshing then
//! runs as a fixed sequence of steps:
//!
//! - An adaptive [octree](crate::octree) is refined around the surface until
//!   every leaf satisfies the requested cell sizes, and each leaf is
//!   classified as inside, outside or intersected by the surface.
//! - A mesh *template* is [extracted](crate::extract) from the leaves: hex
//!   dominant polyhedra, tetrahedra or their voronoi dual.
//! - The template's [topology is cleaned](crate::topology) so that its
//!   boundary can be mapped onto the surface, then its boundary vertices are
//!   [projected](crate::mapping) onto the surface, patches are assigned and
//!   feature edges are captured.
//! - Optional [boundary layers](crate::layers) are extruded from the walls.
//! - Finally, the mesh is [smoothed and untangled](crate::optimize).
//!
//! Each step is registered with a [`WorkflowControls`](crate::workflow::WorkflowControls),
//! which allows a run to stop after a named step and be restarted from a
//! checkpoint later on.
//!
//! The whole pipeline is wrapped up in the
//! [generators](crate::generator):
//! ```
//! use octomesh::{
//!     comm::SerialComm,
//!     config::MeshDict,
//!     generator::CartesianMeshGenerator,
//!     geom::{BoundBox, Point},
//!     surface::box_surface,
//! };
//!
//! let surface = box_surface(&BoundBox::new(Point::zeros(), Point::repeat(1.0)));
//! let dict = MeshDict::with_max_cell_size(0.3);
//! let mesh = CartesianMeshGenerator::new(surface, &dict).generate(&SerialComm)?;
//! assert!(mesh.n_cells() > 0);
//! # Ok::<(), octomesh::Error>(())
//! ```
//!
//! # Parallelism
//! Shared-memory parallelism uses [`rayon`]; the thread pool is selected with
//! [`MeshDict::threads`](crate::config::MeshDict::threads).
//!
//! Distributed-memory runs split the octree leaves between ranks connected by
//! a [`Communicator`](crate::comm::Communicator).  Octree construction and
//! classification are fully distributed; the later mesh stages are run on the
//! first rank after the leaves are gathered there.
#![warn(missing_docs)]

pub mod comm;
pub mod config;
pub mod extract;
pub mod generator;
pub mod geom;
pub mod graph;
pub mod layers;
pub mod mapping;
pub mod mesh;
pub mod octree;
pub mod optimize;
pub mod surface;
pub mod topology;
pub mod workflow;

mod error;
pub use error::Error;
