use approx::assert_relative_eq;
use octomesh::{
    comm::{LocalCluster, SerialComm},
    config::{BoundaryLayerSettings, MeshDict},
    generator::{CartesianMeshGenerator, TetMeshGenerator, VoronoiMeshGenerator},
    geom::{BoundBox, Point},
    layers::LAYER_CELLS_SUBSET,
    mesh::{quality, PolyMesh},
    surface::{box_surface, sphere_surface, TriSurface},
    Error,
};

fn unit_box() -> TriSurface {
    box_surface(&BoundBox::new(Point::zeros(), Point::repeat(1.0)))
}

fn total_volume(mesh: &PolyMesh) -> f64 {
    quality::cell_centres_and_volumes(mesh).1.iter().sum()
}

/// Checks that every boundary point lies on one of the box sides
fn check_on_unit_box(mesh: &PolyMesh) {
    for f in mesh.boundary_faces() {
        for p in &mesh.faces()[f] {
            let x = mesh.points()[*p];
            let d = x.iter().map(|v| v.abs().min((v - 1.0).abs())).fold(f64::INFINITY, f64::min);
            assert!(d < 1e-6, "boundary point {p} at {x:?} is off the surface");
        }
    }
}

fn check_patches(mesh: &PolyMesh, surface: &TriSurface) {
    for p in mesh.patches() {
        assert!(
            p.size == 0 || surface.patch_index(&p.name).is_some(),
            "unexpected patch {} with {} faces",
            p.name,
            p.size
        );
    }
}

#[test]
fn test_cartesian_box() {
    let surface = unit_box();
    let dict = MeshDict::with_max_cell_size(0.15);
    let mesh = CartesianMeshGenerator::new(unit_box(), &dict)
        .generate(&SerialComm)
        .unwrap();
    assert!(mesh.n_cells() > 100);
    check_on_unit_box(&mesh);
    check_patches(&mesh, &surface);
    assert_relative_eq!(total_volume(&mesh), 1.0, epsilon = 1e-2);

    let report = quality::check_mesh(&mesh);
    assert!(report.min_volume > 0.0);
}

#[test]
fn test_cartesian_sphere() {
    let centre = Point::repeat(0.25);
    let surface = sphere_surface(centre, 1.0, 3);
    let dict = MeshDict::with_max_cell_size(0.2);
    let mesh = CartesianMeshGenerator::new(surface, &dict)
        .generate(&SerialComm)
        .unwrap();
    assert!(mesh.n_cells() > 0);
    for f in mesh.boundary_faces() {
        for p in &mesh.faces()[f] {
            let r = (mesh.points()[*p] - centre).norm();
            assert!((r - 1.0).abs() < 0.05, "boundary point {p} at radius {r}");
        }
    }
    let sphere = 4.0 / 3.0 * std::f64::consts::PI;
    let v = total_volume(&mesh);
    assert!((v - sphere).abs() / sphere < 0.05, "volume {v}");
}

#[test]
fn test_tet_box() {
    let dict = MeshDict::with_max_cell_size(0.2);
    let mesh = TetMeshGenerator::new(unit_box(), &dict)
        .generate(&SerialComm)
        .unwrap();
    assert!(mesh.n_cells() > 0);
    check_on_unit_box(&mesh);
    assert_relative_eq!(total_volume(&mesh), 1.0, epsilon = 1e-2);
}

#[test]
fn test_voronoi_box() {
    let dict = MeshDict::with_max_cell_size(0.2);
    let mesh = VoronoiMeshGenerator::new(unit_box(), &dict)
        .generate(&SerialComm)
        .unwrap();
    assert!(mesh.n_cells() > 0);
    check_on_unit_box(&mesh);
    assert_relative_eq!(total_volume(&mesh), 1.0, epsilon = 1e-2);
}

#[test]
fn test_boundary_layers() {
    let dict = MeshDict {
        boundary_layers: BoundaryLayerSettings {
            n_layers: 2,
            ..BoundaryLayerSettings::default()
        },
        ..MeshDict::with_max_cell_size(0.2)
    };
    let mesh = CartesianMeshGenerator::new(unit_box(), &dict)
        .generate(&SerialComm)
        .unwrap();
    let layer = &mesh.subsets().cells[LAYER_CELLS_SUBSET];
    assert!(!layer.is_empty());
    assert!(layer.len() < mesh.n_cells());
    check_on_unit_box(&mesh);
    assert_relative_eq!(total_volume(&mesh), 1.0, epsilon = 1e-2);
}

#[test]
fn test_distributed_generation() {
    let dict = MeshDict::with_max_cell_size(0.2);
    let meshes = LocalCluster::run(2, |comm| {
        CartesianMeshGenerator::new(unit_box(), &dict).generate(comm)
    });
    let mut meshes = meshes.into_iter();
    let first = meshes.next().unwrap().unwrap();
    assert!(first.n_cells() > 0);
    assert_relative_eq!(total_volume(&first), 1.0, epsilon = 1e-2);
    assert_eq!(
        first.metadata()["workflowControls"]["completedSteps"]
            .as_array()
            .map(Vec::len),
        Some(8)
    );

    // The mesh lives on rank 0 only
    for m in meshes {
        let m = m.unwrap();
        assert_eq!(m.n_cells(), 0);
        assert!(m.points().is_empty());
    }
}

#[test]
fn test_bad_dictionaries() {
    let dict = MeshDict::from_json(r#"{ "boundary_cell_size": 0.1 }"#);
    assert!(matches!(dict, Err(Error::MissingEntry("max_cell_size"))));

    let dict = MeshDict::from_json(
        r#"{ "max_cell_size": 0.2,
             "patch_refinement": [{ "patch": "inlet", "cell_size": 0.1 }] }"#,
    )
    .unwrap();
    let r = CartesianMeshGenerator::new(unit_box(), &dict).generate(&SerialComm);
    assert!(matches!(r, Err(Error::UnknownPatch(p)) if p == "inlet"));

    let dict = MeshDict::with_max_cell_size(0.2);
    let r = TetMeshGenerator::new(TriSurface::default(), &dict).generate(&SerialComm);
    assert!(matches!(r, Err(Error::EmptySurface)));
}
