//! Collective communication
//!
//! Operations every member of a group must invoke in matching order: the
//! blocking barrier, the nonblocking barrier (the shape of `MPI_Ibarrier`,
//! returning a [`BarrierRequest`]), and an in-place summing all-reduce.

use std::sync::{Arc, Condvar, Mutex};

use crate::error::Error;
use crate::point_to_point::{Destination, Source};
use crate::tags;
use crate::topology::{AsCommunicator, GroupState};
use crate::Count;

/// Arrival counts of the nonblocking barriers of a group.
///
/// Epoch `e` is the `e`-th nonblocking barrier posted on the group; a barrier
/// is complete once all ranks have entered its epoch.
pub(crate) struct IbarrierBoard {
    counts: Mutex<Vec<usize>>,
    entered: Condvar,
}

impl IbarrierBoard {
    pub(crate) fn new() -> IbarrierBoard {
        IbarrierBoard {
            counts: Mutex::new(Vec::new()),
            entered: Condvar::new(),
        }
    }

    fn enter(&self, epoch: usize) {
        let mut counts = self.counts.lock().expect("ibarrier board poisoned");
        if counts.len() <= epoch {
            counts.resize(epoch + 1, 0);
        }
        counts[epoch] += 1;
        self.entered.notify_all();
    }

    fn reached(&self, epoch: usize, size: usize) -> bool {
        let counts = self.counts.lock().expect("ibarrier board poisoned");
        counts.get(epoch).map_or(false, |&count| count == size)
    }

    fn wait(&self, epoch: usize, size: usize) {
        let mut counts = self.counts.lock().expect("ibarrier board poisoned");
        while counts.get(epoch).map_or(true, |&count| count < size) {
            counts = self.entered.wait(counts).expect("ibarrier board poisoned");
        }
    }
}

/// A request object for a nonblocking barrier.
///
/// Local completion implies that every rank of the group has entered the
/// barrier.
#[must_use]
pub struct BarrierRequest {
    state: Arc<GroupState>,
    epoch: usize,
}

impl BarrierRequest {
    /// Whether all ranks have entered the barrier.
    pub fn test(&self) -> bool {
        self.state.ibarrier.reached(self.epoch, self.state.size)
    }

    /// Blocks until all ranks have entered the barrier.
    pub fn wait(self) {
        self.state.ibarrier.wait(self.epoch, self.state.size);
    }
}

/// Collective operations on a communicator
pub trait CommunicatorCollectives: AsCommunicator {
    /// Blocks until all ranks of the group have entered the barrier.
    fn barrier(&self) {
        self.as_communicator().state.barrier.wait();
    }

    /// Enters a nonblocking barrier.
    ///
    /// The returned request completes once every rank has entered the
    /// matching barrier. Point to point traffic may continue while the
    /// barrier is pending.
    fn immediate_barrier(&self) -> BarrierRequest {
        let comm = self.as_communicator();
        let epoch = comm.next_ibarrier_epoch();
        comm.state.ibarrier.enter(epoch);
        BarrierRequest {
            state: Arc::clone(&comm.state),
            epoch,
        }
    }

    /// Elementwise sum of `buf` across all ranks, in place.
    ///
    /// Every rank passes a buffer of the same length and, on return, holds
    /// the elementwise sum of all contributions.
    fn all_reduce_sum_into(&self, buf: &mut [Count]) -> Result<(), Error> {
        let comm = self.as_communicator();
        let rank = comm.rank();
        for other in 0..comm.size() {
            if other != rank {
                comm.process_at_rank(other)
                    .send_with_tag(&buf[..], tags::ALL_REDUCE);
            }
        }
        let mut contribution = vec![0 as Count; buf.len()];
        for other in 0..comm.size() {
            if other != rank {
                comm.process_at_rank(other)
                    .receive_into_with_tag(&mut contribution[..], tags::ALL_REDUCE)?;
                for (acc, val) in buf.iter_mut().zip(&contribution) {
                    *acc += val;
                }
            }
        }
        Ok(())
    }
}

impl<C: AsCommunicator> CommunicatorCollectives for C {}

#[cfg(test)]
mod tests {
    use crate::environment::{self, Config};
    use crate::traits::*;
    use crate::Count;

    #[test]
    fn all_reduce_sums_elementwise() {
        environment::run(Config::new(4), |world| {
            let rank = world.rank();
            let mut counts = vec![0 as Count; 4];
            counts[rank as usize] = rank + 1;
            world.all_reduce_sum_into(&mut counts).unwrap();
            assert_eq!(counts, vec![1, 2, 3, 4]);
        });
    }

    #[test]
    fn all_reduce_repeated_calls_stay_ordered() {
        environment::run(Config::new(3), |world| {
            let mut first = vec![1 as Count];
            let mut second = vec![10 as Count];
            world.all_reduce_sum_into(&mut first).unwrap();
            world.all_reduce_sum_into(&mut second).unwrap();
            assert_eq!((first[0], second[0]), (3, 30));
        });
    }

    // Staged sends around a nonblocking barrier. Third-stage messages are
    // sent only after the barrier completed, hence after rank 0 entered it,
    // hence after rank 0 finished its first stage of receives: no `3` can
    // appear among the first n values.
    #[test]
    fn immediate_barrier_orders_stages() {
        let tag = 11;
        environment::run(Config::new(3), move |world| {
            if world.rank() > 0 {
                world.process_at_rank(0).send_with_tag(&[1u64][..], tag);
                let barrier = world.immediate_barrier();
                world.process_at_rank(0).send_with_tag(&[2u64][..], tag);
                barrier.wait();
                world.process_at_rank(0).send_with_tag(&[3u64][..], tag);
            } else {
                let n = (world.size() - 1) as usize;
                let mut buf = vec![0u64; 3 * n];
                for val in buf[0..n].iter_mut() {
                    world
                        .any_process()
                        .receive_into_with_tag(std::slice::from_mut(val), tag)
                        .unwrap();
                }
                let barrier = world.immediate_barrier();
                barrier.wait();
                for val in buf[n..3 * n].iter_mut() {
                    world
                        .any_process()
                        .receive_into_with_tag(std::slice::from_mut(val), tag)
                        .unwrap();
                }
                assert!(buf[0..n].iter().all(|&val| val == 1 || val == 2));
                let mut all = buf.clone();
                all.sort_unstable();
                assert_eq!(all, vec![1, 1, 2, 2, 3, 3]);
            }
        });
    }
}
