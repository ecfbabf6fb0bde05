use std::sync::Arc;

use approx::assert_relative_eq;
use octomesh::{
    comm::{LocalCluster, SerialComm},
    config::MeshDict,
    geom::{BoundBox, Point},
    octree::{CubeType, Octree, OctreeCreator, OctreeModifier},
    surface::{box_surface, sphere_surface},
};

fn owned_volume(octree: &Octree) -> f64 {
    (0..octree.n_leaves())
        .filter(|l| octree.is_owned(*l))
        .map(|l| octree.leaf_box(l).span().product())
        .sum()
}

fn root_volume(octree: &Octree) -> f64 {
    octree.root_box().bb.span().product()
}

#[test]
fn test_sphere_classification() {
    let centre = Point::repeat(0.5);
    let surface = Arc::new(sphere_surface(centre, 1.0, 3));
    let dict = MeshDict::with_max_cell_size(0.2);
    let octree = OctreeCreator::new(surface, &dict)
        .create_octree(&SerialComm)
        .unwrap();

    let mut counts = [0; 3];
    for l in 0..octree.n_leaves() {
        let bb = octree.leaf_box(l);
        let r = (octree.leaf_centre(l) - centre).norm();
        let half_diagonal = bb.span().norm() / 2.0;
        match octree.leaf_type(l) {
            CubeType::Inside => {
                counts[0] += 1;
                assert!(r + half_diagonal <= 1.0 + 1e-9, "inside leaf {l} at {r}");
                assert!(
                    octree.leaf_elements(l).is_empty(),
                    "inside leaf {l} crosses the surface"
                );
            }
            CubeType::Data => {
                counts[1] += 1;
                assert!(
                    (r - 1.0).abs() <= half_diagonal + 0.05,
                    "boundary leaf {l} at {r}"
                );
            }
            CubeType::Outside => {
                counts[2] += 1;
                assert!(r > 0.9, "outside leaf {l} at {r}");
            }
            CubeType::Unknown => panic!("leaf {l} was not classified"),
        }
    }
    assert!(counts.iter().all(|c| *c > 0), "{counts:?}");
    assert_relative_eq!(owned_volume(&octree), root_volume(&octree), epsilon = 1e-9);
}

#[test]
fn test_cell_size_limits() {
    let surface = Arc::new(box_surface(&BoundBox::new(
        Point::zeros(),
        Point::new(2.0, 1.0, 1.0),
    )));
    let dict = MeshDict {
        boundary_cell_size: Some(0.125),
        ..MeshDict::with_max_cell_size(0.5)
    };
    let octree = OctreeCreator::new(surface, &dict)
        .create_octree(&SerialComm)
        .unwrap();
    for l in 0..octree.n_leaves() {
        let size = octree.leaf_size(l);
        assert!(size <= 0.5 + 1e-9, "leaf {l} is {size} wide");
        if octree.leaf_type(l) == CubeType::Data {
            assert!(size <= 0.125 + 1e-9, "boundary leaf {l} is {size} wide");
        }
    }
}

#[test]
fn test_distributed_octree() {
    let centre = Point::repeat(0.0);
    let surface = Arc::new(sphere_surface(centre, 1.0, 2));
    let dict = MeshDict::with_max_cell_size(0.25);

    let serial = OctreeCreator::new(surface.clone(), &dict)
        .create_octree(&SerialComm)
        .unwrap();
    let root = root_volume(&serial);

    let out = LocalCluster::run(3, |comm| {
        let mut octree = OctreeCreator::new(surface.clone(), &dict)
            .create_octree(comm)
            .unwrap();
        let owned = owned_volume(&octree);
        OctreeModifier::new(&mut octree)
            .gather_to_master(comm)
            .unwrap();
        (owned, owned_volume(&octree), root_volume(&octree))
    });

    // Owned leaves of all ranks tile the root box exactly once
    let total: f64 = out.iter().map(|(v, _, _)| v).sum();
    assert_relative_eq!(total, root, epsilon = 1e-9);
    assert!(out.iter().all(|(v, _, _)| *v > 0.0));
    for (_, _, r) in &out {
        assert_relative_eq!(*r, root, epsilon = 1e-12);
    }

    // After gathering, rank 0 holds every leaf
    assert_relative_eq!(out[0].1, root, epsilon = 1e-9);
}
