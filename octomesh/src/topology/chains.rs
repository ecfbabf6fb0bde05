//! Ordering of edge sets into point chains
use std::collections::BTreeMap;

/// Sorts edges into chains of consecutive points
///
/// Points where the number of edges is not two end a chain, so an open
/// chain runs between two such points.  Closed chains start at their lowest
/// point and do not repeat it at the end.  Open chains come first, then
/// closed ones.
pub fn sort_edges_into_chains(edges: &[[usize; 2]]) -> Vec<Vec<usize>> {
    let mut point_edges: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, [a, b]) in edges.iter().enumerate() {
        point_edges.entry(*a).or_default().push(i);
        point_edges.entry(*b).or_default().push(i);
    }
    let mut used = vec![false; edges.len()];
    let mut chains = vec![];

    let walk = |start: usize, used: &mut [bool], closed: bool| -> Option<Vec<usize>> {
        let mut chain = vec![start];
        let mut cur = start;
        loop {
            let e = *point_edges[&cur].iter().find(|e| !used[**e])?;
            used[e] = true;
            let [a, b] = edges[e];
            cur = if a == cur { b } else { a };
            if closed && cur == start {
                return Some(chain);
            }
            chain.push(cur);
            if point_edges[&cur].len() != 2 {
                return Some(chain);
            }
        }
    };

    for (p, es) in &point_edges {
        if es.len() == 2 {
            continue;
        }
        while es.iter().any(|e| !used[*e]) {
            if let Some(c) = walk(*p, &mut used, false) {
                chains.push(c);
            }
        }
    }
    for (p, es) in &point_edges {
        if es.iter().any(|e| !used[*e]) {
            if let Some(c) = walk(*p, &mut used, true) {
                chains.push(c);
            }
        }
    }
    chains
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn closed_loop() {
        let chains = sort_edges_into_chains(&[[0, 1], [1, 2], [2, 0]]);
        assert_eq!(chains, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn open_and_closed() {
        let chains = sort_edges_into_chains(&[[5, 4], [3, 4], [7, 8], [8, 9], [9, 7]]);
        assert_eq!(chains, vec![vec![3, 4, 5], vec![7, 8, 9]]);
    }

    #[test]
    fn branch_point_splits_chains() {
        // Three spokes meeting at 0
        let chains = sort_edges_into_chains(&[[0, 1], [0, 2], [3, 0], [1, 4]]);
        assert_eq!(chains, vec![vec![0, 1, 4], vec![0, 2], vec![0, 3]]);
    }
}
