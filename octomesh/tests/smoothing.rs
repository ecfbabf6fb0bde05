use approx::assert_relative_eq;
use octomesh::{
    config::OptimisationSettings,
    geom::Point,
    mesh::{quality, MeshBuilder, PolyMesh},
    optimize::{LaplaceSmoother, MeshOptimizer, PartTetMesh, BAD_POINTS_SUBSET},
};

const N: usize = 3;

fn idx(i: usize, j: usize, k: usize) -> usize {
    i + j * (N + 1) + k * (N + 1) * (N + 1)
}

/// Unit-spaced block of `N³` hexahedra
fn block() -> PolyMesh {
    let mut b = MeshBuilder::new();
    for k in 0..=N {
        for j in 0..=N {
            for i in 0..=N {
                b.add_point(Point::new(i as f64, j as f64, k as f64));
            }
        }
    }
    for k in 0..N {
        for j in 0..N {
            for i in 0..N {
                let c: [usize; 8] = std::array::from_fn(|m| {
                    idx(i + (m & 1), j + ((m >> 1) & 1), k + ((m >> 2) & 1))
                });
                let faces = [
                    [0, 4, 6, 2],
                    [1, 3, 7, 5],
                    [0, 1, 5, 4],
                    [2, 6, 7, 3],
                    [0, 2, 3, 1],
                    [4, 5, 7, 6],
                ]
                .iter()
                .map(|s| s.iter().map(|m| c[*m]).collect())
                .collect::<Vec<Vec<usize>>>();
                b.add_cell(faces).unwrap();
            }
        }
    }
    b.build("walls").unwrap()
}

/// Worst quality of the tetrahedra around cell and face centres
fn min_tet_quality(mesh: &PolyMesh) -> f64 {
    PartTetMesh::new(mesh, &vec![false; mesh.n_points()]).min_quality()
}

fn min_volume(mesh: &PolyMesh) -> f64 {
    quality::cell_centres_and_volumes(mesh)
        .1
        .into_iter()
        .fold(f64::INFINITY, f64::min)
}

#[test]
fn test_untangle_block() {
    let mut mesh = block();
    mesh.points_mut()[idx(1, 1, 1)] = Point::new(2.4, 2.3, 2.2);
    assert!(min_tet_quality(&mesh) < 0.0);

    let settings = OptimisationSettings::default();
    let unresolved = MeshOptimizer::new(&mut mesh, &settings).untangle_mesh_fv(20);
    assert_eq!(unresolved, 0);
    assert!(min_tet_quality(&mesh) > 0.0);
    assert!(min_volume(&mesh) > 0.0);
    assert!(!mesh.subsets().points.contains_key(BAD_POINTS_SUBSET));
    assert_eq!(quality::check_mesh(&mesh).n_inverted_pyramids, 0);

    // Boundary points never move
    for f in mesh.boundary_faces() {
        for p in &mesh.faces()[f] {
            let x = mesh.points()[*p];
            assert_relative_eq!(x, x.map(f64::round));
        }
    }
}

#[test]
fn test_locked_points_stay() {
    let mut mesh = block();
    let p = idx(2, 2, 2);
    let moved = Point::new(1.7, 2.1, 2.05);
    mesh.points_mut()[p] = moved;
    mesh.points_mut()[idx(1, 1, 1)] = Point::new(1.9, 1.9, 1.9);

    let settings = OptimisationSettings::default();
    let mut opt = MeshOptimizer::new(&mut mesh, &settings);
    opt.lock_points([p]);
    opt.optimize_mesh_fv();
    assert_eq!(mesh.points()[p], moved);
    assert!(min_volume(&mesh) > 0.0);
}

#[test]
fn test_laplacian_restores_grid() {
    let mut mesh = block();
    let inner = [
        idx(1, 1, 1),
        idx(2, 1, 1),
        idx(1, 2, 1),
        idx(2, 2, 1),
        idx(1, 1, 2),
        idx(2, 1, 2),
        idx(1, 2, 2),
        idx(2, 2, 2),
    ];
    for (n, p) in inner.iter().enumerate() {
        let d = 0.05 * (n as f64 + 1.0);
        mesh.points_mut()[*p] += Point::new(d, -d, 0.5 * d);
    }
    LaplaceSmoother::new(&mut mesh).optimize_laplacian(60);
    for k in 1..N {
        for j in 1..N {
            for i in 1..N {
                let x = mesh.points()[idx(i, j, k)];
                assert_relative_eq!(
                    x,
                    Point::new(i as f64, j as f64, k as f64),
                    epsilon = 1e-9
                );
            }
        }
    }
}
