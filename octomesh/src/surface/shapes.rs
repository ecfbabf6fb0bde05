//! Builders for simple closed (and open) surfaces
use super::{Facet, Patch, TriSurface};
use crate::geom::{BoundBox, Point};
use std::collections::HashMap;

/// Builds a box surface with one patch per side
///
/// Patches are named `xMin`, `xMax`, `yMin`, `yMax`, `zMin`, `zMax`; corner
/// `i` of the box sits at `(i & 1, i & 2, i & 4)`.
pub fn box_surface(bb: &BoundBox) -> TriSurface {
    let points = (0..8)
        .map(|i| {
            Point::new(
                if i & 1 != 0 { bb.max.x } else { bb.min.x },
                if i & 2 != 0 { bb.max.y } else { bb.min.y },
                if i & 4 != 0 { bb.max.z } else { bb.min.z },
            )
        })
        .collect();
    const SIDES: [(&str, [usize; 4]); 6] = [
        ("xMin", [0, 4, 6, 2]),
        ("xMax", [1, 3, 7, 5]),
        ("yMin", [0, 1, 5, 4]),
        ("yMax", [2, 6, 7, 3]),
        ("zMin", [0, 2, 3, 1]),
        ("zMax", [4, 5, 7, 6]),
    ];
    let mut facets = vec![];
    let mut patches = vec![];
    for (patch, (name, [a, b, c, d])) in SIDES.iter().enumerate() {
        patches.push(Patch::new(*name));
        facets.push(Facet { points: [*a, *b, *c], patch });
        facets.push(Facet { points: [*a, *c, *d], patch });
    }
    // Hard-coded topology is always valid
    TriSurface {
        points,
        facets,
        patches,
        ..TriSurface::default()
    }
}

/// Builds an icosphere with the given number of subdivisions
pub fn sphere_surface(centre: Point, radius: f64, subdivisions: usize) -> TriSurface {
    let t = (1.0 + 5f64.sqrt()) / 2.0;
    let mut points: Vec<Point> = [
        [-1.0, t, 0.0],
        [1.0, t, 0.0],
        [-1.0, -t, 0.0],
        [1.0, -t, 0.0],
        [0.0, -1.0, t],
        [0.0, 1.0, t],
        [0.0, -1.0, -t],
        [0.0, 1.0, -t],
        [t, 0.0, -1.0],
        [t, 0.0, 1.0],
        [-t, 0.0, -1.0],
        [-t, 0.0, 1.0],
    ]
    .iter()
    .map(|p| Point::new(p[0], p[1], p[2]).normalize())
    .collect();
    let mut tris: Vec<[usize; 3]> = vec![
        [0, 11, 5],
        [0, 5, 1],
        [0, 1, 7],
        [0, 7, 10],
        [0, 10, 11],
        [1, 5, 9],
        [5, 11, 4],
        [11, 10, 2],
        [10, 7, 6],
        [7, 1, 8],
        [3, 9, 4],
        [3, 4, 2],
        [3, 2, 6],
        [3, 6, 8],
        [3, 8, 9],
        [4, 9, 5],
        [2, 4, 11],
        [6, 2, 10],
        [8, 6, 7],
        [9, 8, 1],
    ];

    for _ in 0..subdivisions {
        let mut mids: HashMap<(usize, usize), usize> = HashMap::new();
        let mut mid = |a: usize, b: usize, points: &mut Vec<Point>| {
            let key = (a.min(b), a.max(b));
            *mids.entry(key).or_insert_with(|| {
                points.push(((points[a] + points[b]) * 0.5).normalize());
                points.len() - 1
            })
        };
        let mut next = Vec::with_capacity(tris.len() * 4);
        for [a, b, c] in tris {
            let ab = mid(a, b, &mut points);
            let bc = mid(b, c, &mut points);
            let ca = mid(c, a, &mut points);
            next.extend([[a, ab, ca], [b, bc, ab], [c, ca, bc], [ab, bc, ca]]);
        }
        tris = next;
    }

    let facets = tris
        .into_iter()
        .map(|[a, b, c]| {
            // Orient every facet outwards
            let n = (points[b] - points[a]).cross(&(points[c] - points[a]));
            let points = if n.dot(&(points[a] + points[b] + points[c])) < 0.0 {
                [a, c, b]
            } else {
                [a, b, c]
            };
            Facet { points, patch: 0 }
        })
        .collect();
    let points = points.into_iter().map(|p| centre + p * radius).collect();
    TriSurface {
        points,
        facets,
        patches: vec![Patch::new("sphere")],
        ..TriSurface::default()
    }
}

/// Builds the side walls of a counter-clockwise polygon extruded along `z`
///
/// The result is an open ribbon without caps, which is what planar (2D)
/// meshing expects as input.
pub fn extruded_polygon(polygon: &[[f64; 2]], z0: f64, z1: f64) -> TriSurface {
    let n = polygon.len();
    let mut points = Vec::with_capacity(2 * n);
    for z in [z0, z1] {
        points.extend(polygon.iter().map(|[x, y]| Point::new(*x, *y, z)));
    }
    let mut facets = Vec::with_capacity(2 * n);
    for i in 0..n {
        let j = (i + 1) % n;
        let (b0, b1, t0, t1) = (i, j, n + i, n + j);
        facets.push(Facet { points: [b0, b1, t1], patch: 0 });
        facets.push(Facet { points: [b0, t1, t0], patch: 0 });
    }
    TriSurface {
        points,
        facets,
        patches: vec![Patch::new("walls")],
        ..TriSurface::default()
    }
}
