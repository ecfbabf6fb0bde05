//! Compact row-wise adjacency storage
//!
//! Most connectivity in the mesher is "variable number of labels per row"
//! (leaf → nodes, point → faces, ...).  [`Graph`] stores all rows in one flat
//! array plus row offsets, which keeps lookups cheap and cache-friendly.

/// Variable-row-width graph, stored as offsets into a flat array
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Graph {
    offsets: Vec<usize>,
    data: Vec<usize>,
}

impl Graph {
    /// Builds an empty graph
    pub fn new() -> Self {
        Self {
            offsets: vec![0],
            data: vec![],
        }
    }

    /// Builds a graph with the given rows
    pub fn from_rows<R, I>(rows: R) -> Self
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = usize>,
    {
        let mut out = Self::new();
        for r in rows {
            out.append_row(r);
        }
        out
    }

    /// Builds a graph from `(row, value)` pairs
    ///
    /// Values keep their relative order within each row.
    pub fn from_pairs(n_rows: usize, pairs: &[(usize, usize)]) -> Self {
        let mut counts = vec![0usize; n_rows + 1];
        for &(r, _) in pairs {
            counts[r + 1] += 1;
        }
        for i in 0..n_rows {
            counts[i + 1] += counts[i];
        }
        let mut fill = counts.clone();
        let mut data = vec![0; pairs.len()];
        for &(r, v) in pairs {
            data[fill[r]] = v;
            fill[r] += 1;
        }
        Self {
            offsets: counts,
            data,
        }
    }

    /// Appends a new row to the end of the graph
    pub fn append_row<I: IntoIterator<Item = usize>>(&mut self, row: I) {
        if self.offsets.is_empty() {
            self.offsets.push(0);
        }
        self.data.extend(row);
        self.offsets.push(self.data.len());
    }

    /// Returns the number of rows
    pub fn n_rows(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Returns the given row
    pub fn row(&self, i: usize) -> &[usize] {
        &self.data[self.offsets[i]..self.offsets[i + 1]]
    }

    /// Returns the size of the given row
    pub fn size_of_row(&self, i: usize) -> usize {
        self.offsets[i + 1] - self.offsets[i]
    }

    /// Checks whether the given row contains a value
    pub fn contains(&self, i: usize, v: usize) -> bool {
        self.row(i).contains(&v)
    }

    /// Iterates over all rows
    pub fn rows(&self) -> impl Iterator<Item = &[usize]> + '_ {
        (0..self.n_rows()).map(|i| self.row(i))
    }

    /// Builds the transposed graph, which has `n_cols` rows
    ///
    /// Row `j` of the result lists every row of `self` that contains `j`, in
    /// increasing order.
    pub fn reverse(&self, n_cols: usize) -> Self {
        let mut pairs = Vec::with_capacity(self.data.len());
        for (i, r) in self.rows().enumerate() {
            for &v in r {
                pairs.push((v, i));
            }
        }
        Self::from_pairs(n_cols, &pairs)
    }

    /// Merges per-thread partial graphs into a single graph
    ///
    /// Each part holds a subset of rows; row `i` of the result is the
    /// concatenation of row `i` of every part, in part order.  Parts may have
    /// different row counts.
    pub fn merge_graphs(parts: &[Graph]) -> Self {
        let n = parts.iter().map(|g| g.n_rows()).max().unwrap_or(0);
        let mut out = Self::new();
        for i in 0..n {
            out.append_row(
                parts
                    .iter()
                    .filter(|g| i < g.n_rows())
                    .flat_map(|g| g.row(i).iter().cloned()),
            );
        }
        out
    }
}

impl std::ops::Index<usize> for Graph {
    type Output = [usize];
    fn index(&self, i: usize) -> &[usize] {
        self.row(i)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reverse_graph() {
        let g = Graph::from_rows([vec![0, 2], vec![2], vec![], vec![1, 0]]);
        assert_eq!(g.n_rows(), 4);
        let r = g.reverse(3);
        assert_eq!(r.row(0), &[0, 3]);
        assert_eq!(r.row(1), &[3]);
        assert_eq!(r.row(2), &[0, 1]);
    }

    #[test]
    fn merge() {
        let a = Graph::from_rows([vec![1], vec![2, 3]]);
        let b = Graph::from_rows([vec![4], vec![], vec![5]]);
        let m = Graph::merge_graphs(&[a, b]);
        assert_eq!(m.n_rows(), 3);
        assert_eq!(m.row(0), &[1, 4]);
        assert_eq!(m.row(1), &[2, 3]);
        assert_eq!(m.row(2), &[5]);
    }
}
