//! Distribution of octree leaves over ranks
//!
//! Every rank starts from an identical tree.  Leaves are split into
//! contiguous runs of the Morton order, so each rank owns one interval of
//! Morton keys (`proc_starts`); subtrees of other ranks are collapsed into
//! placeholder nodes.  Ghost leaves are copies of a neighbour's leaves kept
//! in the local leaf list with a foreign owner.
use super::{
    coordinates::{CubeCoordinates, MAX_LEVEL},
    cube::{CubeBasic, OTHER_PROC},
    modifier::OctreeModifier,
    Lookup, Neighbour, Octree,
};
use crate::{comm::Communicator, Error};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};

/// Number of finest-level Morton keys covered by a cube at `level`
fn key_span(level: u8) -> u64 {
    1u64 << (3 * (MAX_LEVEL - level) as u32)
}

impl Octree {
    /// Returns the rank owning the given Morton key
    pub(crate) fn owner_of_key(&self, key: u64) -> usize {
        self.proc_starts.partition_point(|s| *s <= key).saturating_sub(1)
    }

    /// Returns the ranks whose key intervals overlap the given cube
    pub fn procs_overlapping(&self, c: &CubeCoordinates) -> Vec<usize> {
        if !c.is_valid(self.root.quadtree) {
            return vec![];
        }
        let lo = c.morton_key();
        let hi = lo + (key_span(c.level()) - 1);
        let first = self.owner_of_key(lo);
        let last = self.owner_of_key(hi);
        (first..=last)
            .filter(|r| {
                let end = self.proc_starts.get(r + 1).copied().unwrap_or(u64::MAX);
                self.proc_starts[*r] < end
            })
            .collect()
    }

    /// Returns the first Morton key of each rank's interval
    pub fn proc_starts(&self) -> &[u64] {
        &self.proc_starts
    }
}

impl OctreeModifier<'_> {
    fn require_parallel<C: Communicator>(comm: &C, op: &'static str) -> Result<(), Error> {
        if comm.is_parallel() {
            Ok(())
        } else {
            Err(Error::SerialRun(op))
        }
    }

    /// Splits the leaves of a replicated tree into contiguous Morton runs
    ///
    /// Every rank must hold the same tree when this is called.  Afterwards
    /// each rank keeps only its own leaves.
    pub fn distribute_leaves_to_processors<C: Communicator>(
        &mut self,
        comm: &C,
    ) -> Result<(), Error> {
        Self::require_parallel(comm, "distribute_leaves_to_processors")?;
        let size = comm.size();
        let rank = comm.rank();
        let n = self.octree().n_leaves();

        let mut starts = vec![0u64; size];
        for l in 0..n {
            let target = l * size / n.max(1);
            self.set_leaf_proc(l, target);
        }
        for r in (1..size).rev() {
            let first = (0..n).find(|l| l * size / n.max(1) == r);
            starts[r] = match first {
                Some(l) => self.octree().leaf_coordinates(l).morton_key(),
                None => starts.get(r + 1).copied().unwrap_or(u64::MAX),
            };
        }
        {
            let o = self.octree_mut();
            o.rank = rank;
            o.n_procs = size;
            o.proc_starts = starts;
        }
        self.purge_processor_cubes(rank);
        self.update_communication_pattern(comm)?;
        info!(
            "rank {rank}: owns {} of {n} leaves after distribution",
            self.octree().n_leaves()
        );
        Ok(())
    }

    /// Rebuilds the path to each given cube and stores its basic data
    ///
    /// Placeholder nodes on the way are refined with
    /// [`refine_missing_cube`](Self::refine_missing_cube).  Returns the number
    /// of cubes inserted.
    pub fn refine_tree_for_coordinates(&mut self, cubes: &[CubeBasic]) -> usize {
        let mut n = 0;
        for b in cubes {
            loop {
                let Some(i) = self.octree().find_node(&b.coordinates) else {
                    break;
                };
                let cube = self.octree().cube(i);
                if cube.level() == b.coordinates.level() {
                    if cube.is_leaf() {
                        self.octree_mut().cubes[i].basic = *b;
                        n += 1;
                    }
                    break;
                }
                if cube.basic.proc_no != OTHER_PROC {
                    // A live leaf already covers this region
                    break;
                }
                self.refine_missing_cube(i);
            }
        }
        self.create_list_of_leaves();
        n
    }

    /// Rebalances leaves so that every rank owns about the same number
    ///
    /// Ranks keep contiguous Morton runs; leaves move only between ranks with
    /// neighbouring intervals.
    pub fn load_distribution<C: Communicator>(&mut self, comm: &C) -> Result<(), Error> {
        Self::require_parallel(comm, "load_distribution")?;
        let rank = comm.rank();
        let size = comm.size();

        // Ghost leaves would be counted twice
        self.purge_processor_cubes(rank);

        let n_local = self.octree().n_leaves();
        let counts = comm.all_gather(n_local)?;
        let total: usize = counts.iter().sum();
        let offset: usize = counts[..rank].iter().sum();

        let mut outgoing: BTreeMap<usize, Vec<CubeBasic>> = BTreeMap::new();
        for l in 0..n_local {
            let target = (offset + l) * size / total.max(1);
            if target != rank {
                let mut b = self.octree().leaf(l).basic;
                b.proc_no = target;
                outgoing.entry(target).or_default().push(b);
                self.set_leaf_proc(l, target);
            }
        }
        let n_sent: usize = outgoing.values().map(|v| v.len()).sum();
        let incoming = comm.exchange(outgoing)?;
        let received: Vec<CubeBasic> = incoming.into_values().flatten().collect();
        self.refine_tree_for_coordinates(&received);

        // New interval starts: the first key held by each rank
        let first = (0..self.octree().n_leaves())
            .find(|l| self.octree().is_owned(*l))
            .map(|l| self.octree().leaf_coordinates(l).morton_key());
        let firsts = comm.all_gather(first)?;
        let mut starts = vec![0u64; size];
        for r in (1..size).rev() {
            starts[r] = match firsts[r] {
                Some(k) => k,
                None => starts.get(r + 1).copied().unwrap_or(u64::MAX),
            };
        }
        self.octree_mut().proc_starts = starts;

        self.purge_processor_cubes(rank);
        self.update_communication_pattern(comm)?;
        debug!(
            "rank {rank}: sent {n_sent} and received {} leaves; now owns {}",
            received.len(),
            self.octree().n_leaves()
        );
        Ok(())
    }

    /// Recomputes the set of ranks owning space next to this rank's leaves
    ///
    /// The result is symmetric: if rank A lists B, then B lists A.
    pub fn update_communication_pattern<C: Communicator>(
        &mut self,
        comm: &C,
    ) -> Result<(), Error> {
        Self::require_parallel(comm, "update_communication_pattern")?;
        let rank = comm.rank();
        let mut procs = BTreeSet::new();
        {
            let o = self.octree();
            for l in (0..o.n_leaves()).filter(|l| o.is_owned(*l)) {
                for c in touching_cubes(o, l) {
                    procs.extend(o.procs_overlapping(&c));
                }
            }
        }
        procs.remove(&rank);

        // Make the pattern symmetric
        let outgoing = procs.iter().map(|p| (*p, vec![rank])).collect();
        let incoming = comm.exchange(outgoing)?;
        procs.extend(incoming.into_keys());

        self.octree_mut().neighbour_procs = procs.into_iter().collect();
        Ok(())
    }

    /// Copies the leaves touching other ranks' intervals to those ranks
    ///
    /// The received leaves become ghost leaves: they appear in the leaf list
    /// but are not owned.  Returns the number of ghost leaves added.
    pub fn add_layer_from_neighbouring_processors<C: Communicator>(
        &mut self,
        comm: &C,
    ) -> Result<usize, Error> {
        Self::require_parallel(comm, "add_layer_from_neighbouring_processors")?;
        let rank = comm.rank();
        let mut outgoing: BTreeMap<usize, Vec<CubeBasic>> = BTreeMap::new();
        {
            let o = self.octree();
            for l in (0..o.n_leaves()).filter(|l| o.is_owned(*l)) {
                let mut targets = BTreeSet::new();
                for c in touching_cubes(o, l) {
                    targets.extend(o.procs_overlapping(&c));
                }
                targets.remove(&rank);
                for t in targets {
                    outgoing.entry(t).or_default().push(o.leaf(l).basic);
                }
            }
        }
        let incoming = comm.exchange(outgoing)?;
        let received: Vec<CubeBasic> = incoming.into_values().flatten().collect();
        let n = self.refine_tree_for_coordinates(&received);
        debug!("rank {rank}: added {n} ghost leaves");
        Ok(n)
    }

    /// Grows the refinement set by `n_layers` rings of neighbours, including
    /// neighbours owned by other ranks
    ///
    /// Returns the number of leaves added on this rank.
    pub fn mark_additional_layers_parallel<C: Communicator>(
        &self,
        refine: &mut [bool],
        n_layers: usize,
        comm: &C,
    ) -> Result<usize, Error> {
        Self::require_parallel(comm, "mark_additional_layers_parallel")?;
        let o = self.octree();
        let rank = comm.rank();
        let mut added = 0;
        for _ in 0..n_layers {
            let mut outgoing: BTreeMap<usize, Vec<CubeCoordinates>> = BTreeMap::new();
            for l in (0..o.n_leaves()).filter(|l| refine[*l] && o.is_owned(*l)) {
                let mut targets = BTreeSet::new();
                for c in touching_cubes(o, l) {
                    targets.extend(o.procs_overlapping(&c));
                }
                targets.remove(&rank);
                for t in targets {
                    outgoing.entry(t).or_default().push(o.leaf_coordinates(l));
                }
            }
            let incoming = comm.exchange(outgoing)?;
            let mut n = self.mark_additional_layers(refine, 1);
            for c in incoming.values().flatten() {
                for l in o.find_leaves_touching(c) {
                    if o.is_owned(l) && !refine[l] && o.leaf_level(l) <= c.level() {
                        refine[l] = true;
                        n += 1;
                    }
                }
            }
            added += n;
            if comm.all_reduce_sum(n)? == 0 {
                break;
            }
        }
        Ok(added)
    }

    /// Refines the marked leaves, enforcing regularity across ranks
    ///
    /// Marks on ghost leaves are forwarded to their owners.  Ghost layers are
    /// dropped by this operation.  Returns the number of leaves refined on
    /// this rank.
    pub fn refine_selected_boxes_parallel<C: Communicator>(
        &mut self,
        refine: &mut [bool],
        hex_refinement: bool,
        comm: &C,
    ) -> Result<usize, Error> {
        Self::require_parallel(comm, "refine_selected_boxes_parallel")?;
        let rank = comm.rank();
        let mut sent = vec![false; refine.len()];
        loop {
            loop {
                let mut changed = self.ensure_correct_regularity(refine);
                if hex_refinement {
                    changed += self.ensure_correct_regularity_sons(refine);
                }
                if changed == 0 {
                    break;
                }
            }

            let o = self.octree();
            let mut outgoing: BTreeMap<usize, Vec<CubeCoordinates>> = BTreeMap::new();
            for l in 0..o.n_leaves() {
                if !refine[l] || sent[l] {
                    continue;
                }
                sent[l] = true;
                let c = o.leaf_coordinates(l);
                let mut targets = BTreeSet::new();
                if !o.is_owned(l) {
                    targets.insert(o.leaf_proc(l));
                }
                for t in touching_cubes(o, l) {
                    targets.extend(o.procs_overlapping(&t));
                }
                if hex_refinement {
                    targets.extend(o.procs_overlapping(&c.reduce_level_by(1)));
                }
                targets.remove(&rank);
                for t in targets {
                    outgoing.entry(t).or_default().push(c);
                }
            }
            let incoming = comm.exchange(outgoing)?;

            let mut changed = false;
            for c in incoming.values().flatten() {
                let mut mark = |l: usize| {
                    if o.is_owned(l) && !refine[l] {
                        refine[l] = true;
                        changed = true;
                    }
                };
                for l in o.find_leaves_sharing_face(c) {
                    if o.leaf_level(l) < c.level() {
                        mark(l);
                    }
                }
                if let Some(l) = o.find_leaf_label_for_position(c) {
                    mark(l);
                }
                if hex_refinement && c.level() > 0 {
                    let parent = c.reduce_level_by(1);
                    for l in o.leaves_under(&parent) {
                        if o.leaf_level(l) == c.level() {
                            mark(l);
                        }
                    }
                }
            }
            if !comm.all_reduce_or(changed)? {
                break;
            }
        }
        let n = self.refine_selected_boxes(refine, hex_refinement);
        self.purge_processor_cubes(rank);
        self.update_communication_pattern(comm)?;
        Ok(n)
    }

    /// Copies every leaf to rank 0, which then holds the complete tree
    ///
    /// Other ranks keep their own leaves unchanged.
    pub fn gather_to_master<C: Communicator>(&mut self, comm: &C) -> Result<(), Error> {
        Self::require_parallel(comm, "gather_to_master")?;
        let rank = comm.rank();
        self.purge_processor_cubes(rank);
        let mut outgoing: BTreeMap<usize, Vec<CubeBasic>> = BTreeMap::new();
        if rank != 0 {
            let o = self.octree();
            outgoing.insert(0, (0..o.n_leaves()).map(|l| o.leaf(l).basic).collect());
        }
        let incoming = comm.exchange(outgoing)?;
        if rank == 0 {
            let mut received: Vec<CubeBasic> = incoming.into_values().flatten().collect();
            for b in &mut received {
                b.proc_no = 0;
            }
            self.refine_tree_for_coordinates(&received);
            let o = self.octree_mut();
            o.n_procs = 1;
            o.proc_starts = vec![0];
            o.neighbour_procs.clear();
            info!("gathered {} leaves on rank 0", o.n_leaves());
        }
        Ok(())
    }
}

impl Octree {
    /// Returns the local leaves inside the given cube
    pub(crate) fn leaves_under(&self, c: &CubeCoordinates) -> Vec<usize> {
        let mut out = vec![];
        match self.find_cube(c) {
            Lookup::Leaf(l) => {
                if c.contains(&self.leaf_coordinates(l)) {
                    out.push(l);
                }
            }
            Lookup::Refined(i) => {
                let mut found = vec![];
                self.collect_leaves(i, |_| true, &mut found);
                out.extend(found.into_iter().filter_map(|n| match n {
                    Neighbour::Leaf(l) => Some(l),
                    _ => None,
                }));
            }
            Lookup::Outside | Lookup::Remote => (),
        }
        out
    }
}

/// Returns the same-level cubes around a leaf (26 in 3D, 8 in quadtree mode)
fn touching_cubes(o: &Octree, leaf: usize) -> Vec<CubeCoordinates> {
    let c = o.leaf_coordinates(leaf);
    let zs: &[i64] = if o.is_quadtree() { &[0] } else { &[-1, 0, 1] };
    let mut out = vec![];
    for dz in zs {
        for dy in [-1, 0, 1] {
            for dx in [-1, 0, 1] {
                if (dx, dy, *dz) != (0, 0, 0) {
                    out.push(c.shifted([dx, dy, *dz]));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::{LocalCluster, SerialComm};
    use crate::octree::test::sphere_octree;
    use crate::octree::{CubeType, InsideOutside};

    #[test]
    fn serial_run_is_rejected() {
        let mut o = sphere_octree(1);
        let mut m = OctreeModifier::new(&mut o);
        assert!(matches!(
            m.distribute_leaves_to_processors(&SerialComm),
            Err(Error::SerialRun(_))
        ));
        assert!(matches!(
            m.load_distribution(&SerialComm),
            Err(Error::SerialRun(_))
        ));
    }

    #[test]
    fn distribution_covers_every_leaf_once() {
        let total = sphere_octree(2).n_leaves();
        let counts = LocalCluster::run(3, |comm| {
            let mut o = sphere_octree(2);
            let mut m = OctreeModifier::new(&mut o);
            m.distribute_leaves_to_processors(comm).unwrap();
            let o = m.octree();
            for l in 0..o.n_leaves() {
                assert!(o.is_owned(l));
                let key = o.leaf_coordinates(l).morton_key();
                assert_eq!(o.owner_of_key(key), o.rank());
            }
            assert!(!o.neighbour_procs().is_empty());
            o.n_leaves()
        });
        assert_eq!(counts.iter().sum::<usize>(), total);
    }

    #[test]
    fn ghost_layer() {
        let out = LocalCluster::run(2, |comm| {
            let mut o = sphere_octree(2);
            let mut m = OctreeModifier::new(&mut o);
            m.distribute_leaves_to_processors(comm).unwrap();
            let owned = m.octree().n_leaves();
            let ghosts = m.add_layer_from_neighbouring_processors(comm).unwrap();
            let o = m.octree();
            assert_eq!(o.n_leaves(), owned + ghosts);
            let n_ghost = (0..o.n_leaves()).filter(|l| !o.is_owned(*l)).count();
            (ghosts, n_ghost)
        });
        for (ghosts, n_ghost) in out {
            // The halves of a 4x4x4 grid share a 4x4 face layer
            assert_eq!(ghosts, 16);
            assert_eq!(n_ghost, 16);
        }
    }

    #[test]
    fn load_balancing() {
        let counts = LocalCluster::run(2, |comm| {
            let mut o = sphere_octree(1);
            let mut m = OctreeModifier::new(&mut o);
            m.distribute_leaves_to_processors(comm).unwrap();

            // Only rank 0 refines, twice
            for _ in 0..2 {
                let n = m.octree().n_leaves();
                let mut refine = vec![comm.rank() == 0; n];
                m.refine_selected_boxes_parallel(&mut refine, false, comm)
                    .unwrap();
            }
            m.load_distribution(comm).unwrap();
            m.octree().n_leaves()
        });
        let total: usize = counts.iter().sum();
        assert!(counts.iter().all(|c| c.abs_diff(total / 2) <= 1), "{counts:?}");
    }

    #[test]
    fn parallel_regularity() {
        let levels = LocalCluster::run(2, |comm| {
            let mut o = sphere_octree(1);
            let mut m = OctreeModifier::new(&mut o);
            m.distribute_leaves_to_processors(comm).unwrap();
            for _ in 0..3 {
                let n = m.octree().n_leaves();
                let mut refine = vec![false; n];
                if comm.rank() == 1 {
                    // Leaf next to the rank boundary
                    refine[0] = true;
                }
                m.refine_selected_boxes_parallel(&mut refine, false, comm)
                    .unwrap();
            }
            m.gather_to_master(comm).unwrap();
            let o = m.octree();
            (0..o.n_leaves())
                .map(|l| {
                    let c = o.leaf_coordinates(l);
                    (c, o.leaf_level(l))
                })
                .collect::<Vec<_>>()
        });
        let leaves = &levels[0];
        // Rank 0 holds the whole tree; check the 2:1 rule on it
        let all: BTreeMap<_, _> = leaves.iter().cloned().collect();
        for (c, l) in &all {
            for (d, k) in &all {
                if c.shares_face(d, false) {
                    assert!((*l as i32 - *k as i32).abs() <= 1);
                }
            }
        }
    }

    #[test]
    fn parallel_classification_matches_serial() {
        let mut serial = sphere_octree(3);
        InsideOutside::new(&mut serial, &SerialComm).run().unwrap();
        let expected: BTreeMap<CubeCoordinates, CubeType> = (0..serial.n_leaves())
            .map(|l| (serial.leaf_coordinates(l), serial.leaf_type(l)))
            .collect();

        let results = LocalCluster::run(3, |comm| {
            let mut o = sphere_octree(3);
            OctreeModifier::new(&mut o)
                .distribute_leaves_to_processors(comm)
                .unwrap();
            InsideOutside::new(&mut o, comm).run().unwrap();
            (0..o.n_leaves())
                .map(|l| (o.leaf_coordinates(l), o.leaf_type(l)))
                .collect::<Vec<_>>()
        });
        let mut n = 0;
        for (c, t) in results.into_iter().flatten() {
            assert_eq!(expected[&c], t, "leaf {c:?}");
            n += 1;
        }
        assert_eq!(n, expected.len());
    }
}
