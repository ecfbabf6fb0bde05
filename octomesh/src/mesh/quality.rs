//! Geometric quality measures
use super::PolyMesh;
use crate::geom::{self, Point};
use log::info;
use rayon::prelude::*;
use std::collections::BTreeSet;

/// Returns the centre and area vector of every face
pub fn face_centres_and_areas(mesh: &PolyMesh) -> (Vec<Point>, Vec<Point>) {
    mesh.faces()
        .par_iter()
        .map(|f| {
            let pts: Vec<Point> = f.iter().map(|p| mesh.points()[*p]).collect();
            let (area, centre) = geom::polygon_normal_and_centre(&pts);
            (centre, area)
        })
        .unzip()
}

/// Returns the centroid and volume of every cell
///
/// Cells are split into pyramids from their faces to the average of their
/// face centres.
pub fn cell_centres_and_volumes(mesh: &PolyMesh) -> (Vec<Point>, Vec<f64>) {
    let (fc, fa) = face_centres_and_areas(mesh);
    let cells = mesh.cells();
    (0..mesh.n_cells())
        .into_par_iter()
        .map(|c| {
            let faces = cells.row(c);
            let estimate = faces.iter().map(|f| fc[*f]).sum::<Point>() / faces.len() as f64;
            let mut volume = 0.0;
            let mut centre = Point::zeros();
            for f in faces {
                let sign = if mesh.owner()[*f] == c { 1.0 } else { -1.0 };
                let v = sign * (fc[*f] - estimate).dot(&fa[*f]) / 3.0;
                volume += v;
                centre += (fc[*f] * 0.75 + estimate * 0.25) * v;
            }
            if volume.abs() > f64::MIN_POSITIVE {
                (centre / volume, volume)
            } else {
                (estimate, volume)
            }
        })
        .unzip()
}

/// Summary of the quality of a mesh
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct QualityReport {
    /// Number of cells
    pub n_cells: usize,
    /// Smallest cell volume
    pub min_volume: f64,
    /// Largest face non-orthogonality, in degrees
    pub max_non_orthogonality: f64,
    /// Largest face skewness
    pub max_skewness: f64,
    /// Faces forming a non-positive pyramid with one of their cells
    pub n_inverted_pyramids: usize,
}

/// Per-face quality measures
struct FaceQuality {
    non_orthogonality: Vec<f64>,
    skewness: Vec<f64>,
    inverted: Vec<bool>,
}

fn face_quality(mesh: &PolyMesh) -> FaceQuality {
    let (fc, fa) = face_centres_and_areas(mesh);
    let (cc, _) = cell_centres_and_volumes(mesh);
    let n_internal = mesh.n_internal_faces();
    let per_face: Vec<(f64, f64, bool)> = (0..mesh.n_faces())
        .into_par_iter()
        .map(|f| {
            let o = cc[mesh.owner()[f]];
            let s = fa[f];
            let (d, inverted) = if f < n_internal {
                let n = cc[mesh.neighbour()[f]];
                (n - o, (fc[f] - o).dot(&s) <= 0.0 || (n - fc[f]).dot(&s) <= 0.0)
            } else {
                (fc[f] - o, (fc[f] - o).dot(&s) <= 0.0)
            };
            let cos = d.dot(&s) / (d.norm() * s.norm()).max(f64::MIN_POSITIVE);
            let non_ortho = cos.clamp(-1.0, 1.0).acos().to_degrees();

            let skew = if f < n_internal {
                // Where the line between the cell centres crosses the face
                let denom = d.dot(&s);
                if denom.abs() > f64::MIN_POSITIVE {
                    let t = (fc[f] - o).dot(&s) / denom;
                    (fc[f] - (o + d * t)).norm() / d.norm().max(f64::MIN_POSITIVE)
                } else {
                    f64::INFINITY
                }
            } else {
                0.0
            };
            (non_ortho, skew, inverted)
        })
        .collect();
    let mut out = FaceQuality {
        non_orthogonality: Vec::with_capacity(per_face.len()),
        skewness: Vec::with_capacity(per_face.len()),
        inverted: Vec::with_capacity(per_face.len()),
    };
    for (n, s, i) in per_face {
        out.non_orthogonality.push(n);
        out.skewness.push(s);
        out.inverted.push(i);
    }
    out
}

/// Checks the mesh and logs a summary
pub fn check_mesh(mesh: &PolyMesh) -> QualityReport {
    let q = face_quality(mesh);
    let (_, volumes) = cell_centres_and_volumes(mesh);
    let report = QualityReport {
        n_cells: mesh.n_cells(),
        min_volume: volumes.iter().copied().fold(f64::INFINITY, f64::min),
        max_non_orthogonality: q.non_orthogonality.iter().copied().fold(0.0, f64::max),
        max_skewness: q.skewness.iter().copied().fold(0.0, f64::max),
        n_inverted_pyramids: q.inverted.iter().filter(|i| **i).count(),
    };
    info!(
        "mesh quality: {} cells, min volume {:e}, max non-orthogonality {:.1}°, \
         max skewness {:.3}, {} inverted face pyramids",
        report.n_cells,
        report.min_volume,
        report.max_non_orthogonality,
        report.max_skewness,
        report.n_inverted_pyramids
    );
    report
}

/// Returns faces that are inverted or more non-orthogonal than the limit
/// (in degrees)
pub fn find_bad_faces(mesh: &PolyMesh, max_non_orthogonality: f64) -> BTreeSet<usize> {
    let q = face_quality(mesh);
    (0..mesh.n_faces())
        .filter(|f| q.inverted[*f] || q.non_orthogonality[*f] > max_non_orthogonality)
        .collect()
}
