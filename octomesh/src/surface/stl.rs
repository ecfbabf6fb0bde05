//! STL input and output
use super::{Facet, Patch, TriSurface};
use crate::{geom::Point, Error};
use std::collections::HashMap;
use std::io::{BufWriter, Read, Write};

/// Merges bitwise-identical vertices while reading
#[derive(Default)]
struct PointMerger {
    map: HashMap<[u64; 3], usize>,
    points: Vec<Point>,
}

impl PointMerger {
    fn insert(&mut self, p: [f64; 3]) -> usize {
        let key = p.map(f64::to_bits);
        *self.map.entry(key).or_insert_with(|| {
            self.points.push(Point::new(p[0], p[1], p[2]));
            self.points.len() - 1
        })
    }
}

impl TriSurface {
    /// Reads an ASCII or binary STL file
    ///
    /// In ASCII files every `solid` becomes a patch; binary files hold a
    /// single patch named `default_patch`.
    pub fn read_stl<R: Read>(input: &mut R, default_patch: &str) -> Result<Self, Error> {
        let mut data = vec![];
        input.read_to_end(&mut data)?;
        if is_binary(&data) {
            read_binary(&data, default_patch)
        } else {
            let text = std::str::from_utf8(&data)
                .map_err(|e| Error::BadStl(format!("invalid text: {e}")))?;
            read_ascii(text, default_patch)
        }
    }

    /// Writes a binary STL to the given output
    pub fn write_stl<F: Write>(&self, out: &mut F) -> Result<(), Error> {
        write_triangles(
            out,
            self.facets.iter().map(|f| f.points.map(|i| self.points[i])),
            self.facets.len(),
        )
    }
}

/// Writes a set of triangles as a binary STL
pub(crate) fn write_triangles<F: Write, I: Iterator<Item = [Point; 3]>>(
    out: &mut F,
    tris: I,
    count: usize,
) -> Result<(), Error> {
    let mut out = BufWriter::new(out);
    const HEADER: &[u8] = b"This is a binary STL file exported by octomesh";
    static_assertions::const_assert!(HEADER.len() <= 80);
    out.write_all(HEADER)?;
    out.write_all(&[0u8; 80 - HEADER.len()])?;
    out.write_all(&(count as u32).to_le_bytes())?;
    for [a, b, c] in tris {
        let n = (b - a).cross(&(c - a));
        let n = n.try_normalize(f64::MIN_POSITIVE).unwrap_or(n);
        for p in n.iter() {
            out.write_all(&(*p as f32).to_le_bytes())?;
        }
        for v in [a, b, c] {
            for p in v.iter() {
                out.write_all(&(*p as f32).to_le_bytes())?;
            }
        }
        out.write_all(&[0u8; std::mem::size_of::<u16>()])?; // attributes
    }
    out.flush()?;
    Ok(())
}

fn is_binary(data: &[u8]) -> bool {
    if data.len() < 84 {
        return false;
    }
    let n = u32::from_le_bytes([data[80], data[81], data[82], data[83]]) as usize;
    data.len() == 84 + n * 50 || !data.starts_with(b"solid")
}

fn read_binary(data: &[u8], patch: &str) -> Result<TriSurface, Error> {
    if data.len() < 84 {
        return Err(Error::BadStl("file is too short for a header".to_owned()));
    }
    let n = u32::from_le_bytes([data[80], data[81], data[82], data[83]]) as usize;
    if data.len() < 84 + n * 50 {
        return Err(Error::BadStl(format!(
            "expected {n} triangles, file holds {} bytes",
            data.len()
        )));
    }
    let f32_at = |i: usize| {
        f32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]) as f64
    };
    let mut merger = PointMerger::default();
    let mut facets = Vec::with_capacity(n);
    for t in 0..n {
        let base = 84 + t * 50 + 12; // skip the normal
        let mut pts = [0; 3];
        for (v, p) in pts.iter_mut().enumerate() {
            let o = base + v * 12;
            *p = merger.insert([f32_at(o), f32_at(o + 4), f32_at(o + 8)]);
        }
        facets.push(Facet { points: pts, patch: 0 });
    }
    TriSurface::new(merger.points, facets, vec![Patch::new(patch)])
}

fn read_ascii(text: &str, default_patch: &str) -> Result<TriSurface, Error> {
    let mut merger = PointMerger::default();
    let mut facets = vec![];
    let mut patches: Vec<Patch> = vec![];
    let mut current = None;
    let mut loop_pts = vec![];

    for (line_no, line) in text.lines().enumerate() {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("solid") => {
                let name = words.next().unwrap_or(default_patch);
                let i = match patches.iter().position(|p| p.name == name) {
                    Some(i) => i,
                    None => {
                        patches.push(Patch::new(name));
                        patches.len() - 1
                    }
                };
                current = Some(i);
            }
            Some("outer") => loop_pts.clear(),
            Some("vertex") => {
                let mut p = [0.0; 3];
                for v in &mut p {
                    *v = words
                        .next()
                        .and_then(|w| w.parse().ok())
                        .ok_or_else(|| {
                            Error::BadStl(format!("bad vertex on line {}", line_no + 1))
                        })?;
                }
                loop_pts.push(merger.insert(p));
            }
            Some("endloop") => {
                if loop_pts.len() != 3 {
                    return Err(Error::BadStl(format!(
                        "loop ending on line {} has {} vertices",
                        line_no + 1,
                        loop_pts.len()
                    )));
                }
                let patch = match current {
                    Some(i) => i,
                    None => {
                        patches.push(Patch::new(default_patch));
                        current = Some(patches.len() - 1);
                        patches.len() - 1
                    }
                };
                facets.push(Facet {
                    points: [loop_pts[0], loop_pts[1], loop_pts[2]],
                    patch,
                });
            }
            Some("endsolid") => current = None,
            _ => (),
        }
    }
    TriSurface::new(merger.points, facets, patches)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geom::BoundBox;
    use crate::surface::box_surface;

    const ASCII: &str = "solid top
facet normal 0 0 1
 outer loop
  vertex 0 0 0
  vertex 1 0 0
  vertex 0 1 0
 endloop
endfacet
endsolid top
solid side
facet normal 0 0 1
 outer loop
  vertex 1 0 0
  vertex 1 1 0
  vertex 0 1 0
 endloop
endfacet
endsolid side
";

    #[test]
    fn ascii_solids_become_patches() {
        let s = TriSurface::read_stl(&mut ASCII.as_bytes(), "patch0").unwrap();
        assert_eq!(s.points().len(), 4);
        assert_eq!(s.facets().len(), 2);
        assert_eq!(s.patches().len(), 2);
        assert_eq!(s.patch_index("side"), Some(1));
        assert_eq!(s.facets()[1].patch, 1);
    }

    #[test]
    fn binary_round_trip() {
        let b = box_surface(&BoundBox::new(Point::zeros(), Point::repeat(2.0)));
        let mut buf = vec![];
        b.write_stl(&mut buf).unwrap();
        assert_eq!(buf.len(), 84 + 12 * 50);

        let s = TriSurface::read_stl(&mut buf.as_slice(), "walls").unwrap();
        assert_eq!(s.points().len(), 8);
        assert_eq!(s.facets().len(), 12);
        assert!(s.open_edges().is_empty());
        assert_eq!(s.patches()[0].name, "walls");
    }

    #[test]
    fn truncated_binary() {
        let mut data = vec![0u8; 84];
        data[80] = 3;
        assert!(matches!(
            TriSurface::read_stl(&mut data.as_slice(), "p"),
            Err(Error::BadStl(..))
        ));
    }
}
