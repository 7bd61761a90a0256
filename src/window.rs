//! One-sided communication
//!
//! A [`Window`] exposes a byte region on every rank of the group. Between
//! two [`fence`](Window::fence) calls (an *exposure epoch*) any rank may
//! [`put`](Window::put) bytes into any other rank's region; outside the
//! epoch the region is accessible only locally, through
//! [`local_region`](Window::local_region).
//!
//! Creation and destruction are collective. The fence is the only
//! synchronization primitive: it separates local access from remote
//! exposure, and after the closing fence all remote writes are locally
//! visible.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::collective::CommunicatorCollectives;
use crate::error::Error;
use crate::topology::{Communicator, GroupState};
use crate::Rank;

type SharedRegion = Arc<Mutex<Vec<u8>>>;

/// Group-wide table of exposed window regions.
///
/// Windows are created collectively and in the same order on every rank, so
/// a per-rank sequence number identifies a window group-wide.
pub(crate) struct Registry {
    entries: Mutex<HashMap<usize, Entry>>,
}

struct Entry {
    regions: Vec<Option<SharedRegion>>,
    live: usize,
}

impl Registry {
    pub(crate) fn new() -> Registry {
        Registry {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn register(&self, seq: usize, size: usize, rank: Rank, region: SharedRegion) {
        let mut entries = self.entries.lock().expect("window registry poisoned");
        let entry = entries.entry(seq).or_insert_with(|| Entry {
            regions: vec![None; size],
            live: 0,
        });
        entry.regions[rank as usize] = Some(region);
        entry.live += 1;
    }

    fn snapshot(&self, seq: usize) -> Vec<SharedRegion> {
        let entries = self.entries.lock().expect("window registry poisoned");
        entries[&seq]
            .regions
            .iter()
            .map(|region| Arc::clone(region.as_ref().expect("window region not registered")))
            .collect()
    }

    fn deregister(&self, seq: usize, rank: Rank) {
        let mut entries = self.entries.lock().expect("window registry poisoned");
        if let Some(entry) = entries.get_mut(&seq) {
            entry.regions[rank as usize] = None;
            entry.live -= 1;
            if entry.live == 0 {
                entries.remove(&seq);
            }
        }
    }
}

/// A byte region exposed for one-sided access on every rank of a group.
pub struct Window {
    state: Arc<GroupState>,
    seq: usize,
    rank: Rank,
    regions: Vec<SharedRegion>,
    bytes: usize,
    disp_unit: usize,
}

impl Window {
    /// Collectively allocates a window of `bytes` zero-initialized bytes per
    /// rank with displacement granularity `disp_unit`.
    pub fn allocate(comm: &Communicator, bytes: usize, disp_unit: usize) -> Window {
        let seq = comm.next_window_seq();
        let region: SharedRegion = Arc::new(Mutex::new(vec![0; bytes]));
        comm.state
            .windows
            .register(seq, comm.state.size, comm.rank(), region);
        // All regions are registered once every rank passes this point.
        comm.barrier();
        let regions = comm.state.windows.snapshot(seq);
        Window {
            state: Arc::clone(&comm.state),
            seq,
            rank: comm.rank(),
            regions,
            bytes,
            disp_unit,
        }
    }

    /// Capacity of the local region in bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Displacement granularity in bytes.
    pub fn disp_unit(&self) -> usize {
        self.disp_unit
    }

    /// One-sided write of `origin` into `target`'s region at displacement
    /// `disp` (in units of [`disp_unit`](Window::disp_unit)).
    ///
    /// Only legal inside an exposure epoch.
    pub fn put(&self, origin: &[u8], target: Rank, disp: usize) -> Result<(), Error> {
        debug_assert!(0 <= target && (target as usize) < self.regions.len());
        let mut region = self.regions[target as usize]
            .lock()
            .expect("window region poisoned");
        let start = disp * self.disp_unit;
        let end = start + origin.len();
        if end > region.len() {
            return Err(Error::WindowRange {
                offset: start,
                len: origin.len(),
                capacity: region.len(),
            });
        }
        region[start..end].copy_from_slice(origin);
        Ok(())
    }

    /// Collective fence separating exposure epochs.
    ///
    /// After the fence returns, all puts of the closing epoch are visible in
    /// the local region, and no put of a later epoch has started.
    pub fn fence(&self) {
        self.state.barrier.wait();
    }

    /// Access to this rank's own region.
    pub fn local_region(&self) -> MutexGuard<'_, Vec<u8>> {
        self.regions[self.rank as usize]
            .lock()
            .expect("window region poisoned")
    }
}

impl Drop for Window {
    // Freeing is collective like allocation; every rank drops its window at
    // the same point of the protocol.
    fn drop(&mut self) {
        self.state.windows.deregister(self.seq, self.rank);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{self, Config};

    #[test]
    fn put_visible_after_fence() {
        environment::run(Config::new(3), |world| {
            let rank = world.rank();
            let window = Window::allocate(&world, 3, 1);
            window.fence();
            for target in 0..world.size() {
                window.put(&[rank as u8 + 1], target, rank as usize).unwrap();
            }
            window.fence();
            assert_eq!(&window.local_region()[..], &[1, 2, 3]);
        });
    }

    #[test]
    fn out_of_range_put_is_rejected() {
        environment::run(Config::new(2), |world| {
            let window = Window::allocate(&world, 4, 1);
            window.fence();
            let err = window.put(&[0u8; 3], 1 - world.rank(), 2).unwrap_err();
            assert_eq!(
                err,
                Error::WindowRange {
                    offset: 2,
                    len: 3,
                    capacity: 4
                }
            );
            window.fence();
        });
    }

    #[test]
    fn reallocation_gets_fresh_zeroed_regions() {
        environment::run(Config::new(2), |world| {
            let first = Window::allocate(&world, 2, 1);
            first.fence();
            first.put(&[0xAB; 2], 1 - world.rank(), 0).unwrap();
            first.fence();
            drop(first);

            let second = Window::allocate(&world, 2, 1);
            assert_eq!(&second.local_region()[..], &[0, 0]);
            second.fence();
            second.fence();
        });
    }
}
