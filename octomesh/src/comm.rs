//! Distributed-memory communication
//!
//! Every parallel algorithm in the mesher follows the same pattern: fill one
//! outgoing buffer per neighbouring rank, perform a collective all-to-all
//! [`exchange`](Communicator::exchange), then apply what arrived.  Results
//! depend only on the data, never on message arrival order.
use crate::Error;
use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

/// Collective communication between ranks
///
/// All methods are collective: every rank must call them in the same order.
pub trait Communicator {
    /// Index of this rank, in `0..size()`
    fn rank(&self) -> usize;

    /// Number of ranks
    fn size(&self) -> usize;

    /// Sends one buffer to each listed rank and receives one from each rank
    ///
    /// Ranks that are absent from `outgoing` receive an empty buffer.  The
    /// result maps source rank to received data and only contains non-empty
    /// buffers.
    fn exchange<T: Send + 'static>(
        &self,
        outgoing: BTreeMap<usize, Vec<T>>,
    ) -> Result<BTreeMap<usize, Vec<T>>, Error>;

    /// Returns `true` if this is a multi-rank run
    fn is_parallel(&self) -> bool {
        self.size() > 1
    }

    /// Gathers one value from every rank, ordered by rank
    fn all_gather<T: Clone + Send + 'static>(&self, v: T) -> Result<Vec<T>, Error> {
        let outgoing = (0..self.size())
            .filter(|r| *r != self.rank())
            .map(|r| (r, vec![v.clone()]))
            .collect();
        let mut incoming = self.exchange(outgoing)?;
        let mut out = Vec::with_capacity(self.size());
        for r in 0..self.size() {
            if r == self.rank() {
                out.push(v.clone());
            } else {
                let t = incoming
                    .remove(&r)
                    .and_then(|mut b| b.pop())
                    .ok_or(Error::CommunicationFailed(r))?;
                out.push(t);
            }
        }
        Ok(out)
    }

    /// Sums a value across all ranks
    fn all_reduce_sum(&self, v: usize) -> Result<usize, Error> {
        Ok(self.all_gather(v)?.into_iter().sum())
    }

    /// Logical-or of a flag across all ranks
    fn all_reduce_or(&self, v: bool) -> Result<bool, Error> {
        Ok(self.all_gather(v)?.into_iter().any(|b| b))
    }

    /// Minimum of a value across all ranks
    fn all_reduce_min(&self, v: f64) -> Result<f64, Error> {
        Ok(self
            .all_gather(v)?
            .into_iter()
            .fold(f64::INFINITY, f64::min))
    }
}

impl<C: Communicator + ?Sized> Communicator for &C {
    fn rank(&self) -> usize {
        (**self).rank()
    }
    fn size(&self) -> usize {
        (**self).size()
    }
    fn exchange<T: Send + 'static>(
        &self,
        outgoing: BTreeMap<usize, Vec<T>>,
    ) -> Result<BTreeMap<usize, Vec<T>>, Error> {
        (**self).exchange(outgoing)
    }
}

/// Communicator for a single-process run
#[derive(Copy, Clone, Debug, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn exchange<T: Send + 'static>(
        &self,
        mut outgoing: BTreeMap<usize, Vec<T>>,
    ) -> Result<BTreeMap<usize, Vec<T>>, Error> {
        // Data addressed to ourselves is looped back
        let mut out = BTreeMap::new();
        if let Some(v) = outgoing.remove(&0) {
            if !v.is_empty() {
                out.insert(0, v);
            }
        }
        Ok(out)
    }
}

type Message = (usize, Box<dyn Any + Send>);

/// One rank of an in-process cluster, connected to its peers by channels
pub struct LocalComm {
    rank: usize,
    peers: Vec<crossbeam_channel::Sender<Message>>,
    inbox: crossbeam_channel::Receiver<Message>,

    /// Messages that arrived early, i.e. from a peer which is already ahead
    /// of us by one or more collective operations
    pending: Mutex<Vec<VecDeque<Box<dyn Any + Send>>>>,
}

impl LocalComm {
    fn recv_from(&self, source: usize) -> Result<Box<dyn Any + Send>, Error> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| Error::CommunicationFailed(source))?;
        if let Some(m) = pending[source].pop_front() {
            return Ok(m);
        }
        loop {
            let (from, m) = self
                .inbox
                .recv()
                .map_err(|_| Error::CommunicationFailed(source))?;
            if from == source {
                return Ok(m);
            }
            pending[from].push_back(m);
        }
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.peers.len()
    }
    fn exchange<T: Send + 'static>(
        &self,
        mut outgoing: BTreeMap<usize, Vec<T>>,
    ) -> Result<BTreeMap<usize, Vec<T>>, Error> {
        let mut out = BTreeMap::new();
        for (r, tx) in self.peers.iter().enumerate() {
            let data = outgoing.remove(&r).unwrap_or_default();
            if r == self.rank {
                if !data.is_empty() {
                    out.insert(r, data);
                }
            } else {
                tx.send((self.rank, Box::new(data)))
                    .map_err(|_| Error::CommunicationFailed(r))?;
            }
        }
        for r in (0..self.size()).filter(|r| *r != self.rank) {
            let m = self.recv_from(r)?;
            let data = m
                .downcast::<Vec<T>>()
                .map_err(|_| Error::CommunicationFailed(r))?;
            if !data.is_empty() {
                out.insert(r, *data);
            }
        }
        Ok(out)
    }
}

/// Builder for a set of in-process ranks
pub struct LocalCluster;

impl LocalCluster {
    /// Builds `n` connected communicators
    pub fn new(n: usize) -> Vec<LocalComm> {
        let (txs, rxs): (Vec<_>, Vec<_>) =
            (0..n).map(|_| crossbeam_channel::unbounded()).unzip();
        rxs.into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalComm {
                rank,
                peers: txs.clone(),
                inbox,
                pending: Mutex::new((0..n).map(|_| VecDeque::new()).collect()),
            })
            .collect()
    }

    /// Runs `f` on `n` ranks, one thread per rank, returning results by rank
    pub fn run<R, F>(n: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(&LocalComm) -> R + Sync,
    {
        let comms = Self::new(n);
        std::thread::scope(|s| {
            let handles = comms
                .iter()
                .map(|c| {
                    let f = &f;
                    s.spawn(move || f(c))
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(r) => r,
                    Err(e) => std::panic::resume_unwind(e),
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn serial_loopback() {
        let c = SerialComm;
        let mut m = BTreeMap::new();
        m.insert(0, vec![1, 2, 3]);
        let r = c.exchange(m).unwrap();
        assert_eq!(r[&0], vec![1, 2, 3]);
        assert_eq!(c.all_reduce_sum(4).unwrap(), 4);
    }

    #[test]
    fn ring_exchange() {
        let out = LocalCluster::run(4, |c| {
            let mut total = 0;
            for round in 0..3 {
                let mut m = BTreeMap::new();
                m.insert((c.rank() + 1) % c.size(), vec![c.rank() * 10 + round]);
                let r = c.exchange(m).unwrap();
                assert_eq!(r.len(), 1);
                let from = (c.rank() + c.size() - 1) % c.size();
                assert_eq!(r[&from], vec![from * 10 + round]);
                total += c.all_reduce_sum(1).unwrap();
            }
            total
        });
        assert_eq!(out, vec![12; 4]);
    }

    fn rank_count<C: Communicator>(c: &C) -> usize {
        c.all_reduce_sum(1).unwrap()
    }

    #[test]
    fn borrowed_communicator() {
        let out = LocalCluster::run(2, |c| {
            // `&c` is a `&&LocalComm`
            (rank_count(c), rank_count(&c), (&c).rank())
        });
        assert_eq!(out, vec![(2, 2, 0), (2, 2, 1)]);
        assert_eq!(rank_count(&&SerialComm), 1);
    }

    #[test]
    fn gather_in_rank_order() {
        let out = LocalCluster::run(3, |c| c.all_gather(c.rank() * 2).unwrap());
        for o in out {
            assert_eq!(o, vec![0, 2, 4]);
        }
    }
}
