//! Sparse neighborhood collectives
//!
//! A sparse all-to-all in compressed row storage (CRS): instead of posting a
//! message to every rank, each rank lists only the destinations it actually
//! talks to, and the *receiver discovers its own partner set*: it does not
//! know a priori who will send to it.
//!
//! The caller assembles a [`SendPlan`] (ordered destinations and payload
//! blocks) and an empty receive-plan skeleton ([`RecvPlan`]) over buffers it
//! allocated. The selected [`Algorithm`] fills the receive plan (partner
//! ranks, per-partner counts and ordered payload) and returns the number of
//! discovered partners. All algorithms deliver the same multiset of
//! `(source, payload)` pairs; the order of `src` is the arrival permutation
//! and not guaranteed stable.
//!
//! Scratch shared across calls (a one-sided window, a request pool, the
//! lazily built per-node group) lives in the [`ExtComm`] extended
//! communicator. At most one collective call per `ExtComm` may be in
//! progress.
//!
//! The two-sided algorithms drain a reserved tag with any-source receives.
//! When two such exchanges follow each other with no synchronization point
//! in between, a rank that is still draining the first exchange can match a
//! fast peer's message from the second; separate back-to-back two-sided
//! exchanges with a barrier (the window algorithms synchronize through
//! their fences already).

use crate::datatype::Equivalence;
use crate::error::Error;
use crate::{Count, Rank};

mod crs;
mod xcomm;

pub use self::xcomm::ExtComm;

/// Selects the partner-discovery algorithm of a sparse collective.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    /// One-sided window protocol: every sender writes its block into the
    /// destination's window, receivers scan their window for nonzero slots
    /// after a fence.
    ///
    /// Fast but restricted: a legitimate all-zero payload is
    /// indistinguishable from "no message". Use only when an all-zero
    /// payload is semantically equivalent to absence (positive sizes,
    /// nonzero indices), or use [`Algorithm::RmaMarked`].
    Rma,
    /// One-sided window protocol with a presence marker byte per slot.
    ///
    /// Lifts the all-zero restriction of [`Algorithm::Rma`] at the cost of
    /// one byte per rank of window space and one extra put per message.
    RmaMarked,
    /// Two-sided protocol: an all-reduce tells each rank how many partners
    /// will send to it, then point to point transfers run under a reserved
    /// tag.
    Personalized,
    /// Two-sided protocol without a collective reduction: synchronous sends
    /// plus a nonblocking barrier detect distributed termination.
    Nonblocking,
}

/// The caller-owned send side of a fixed-size exchange.
///
/// Payload blocks are laid out contiguously in `vals`: the block for
/// `dest[i]` occupies `vals[i * count .. (i + 1) * count]`.
pub struct SendPlan<'a, T> {
    dest: &'a [Rank],
    count: Count,
    vals: &'a [T],
}

impl<'a, T: Equivalence> SendPlan<'a, T> {
    /// A send plan delivering `count` elements of `vals` to each rank in
    /// `dest`.
    pub fn new(dest: &'a [Rank], count: Count, vals: &'a [T]) -> SendPlan<'a, T> {
        debug_assert!(count >= 0);
        debug_assert_eq!(vals.len(), dest.len() * count as usize);
        SendPlan { dest, count, vals }
    }

    /// Number of destinations.
    pub fn n_send(&self) -> usize {
        self.dest.len()
    }
}

/// The caller-allocated receive side of a fixed-size exchange, filled by the
/// collective.
///
/// `src` and `vals` must be large enough for the worst case expected by the
/// caller; the collective fills the first `n_recv` entries (respectively
/// `n_recv * count` elements) in arrival order.
pub struct RecvPlan<'a, T> {
    src: &'a mut [Rank],
    count: Count,
    vals: &'a mut [T],
}

impl<'a, T: Equivalence> RecvPlan<'a, T> {
    /// A receive skeleton expecting `count` elements per discovered partner.
    pub fn new(src: &'a mut [Rank], count: Count, vals: &'a mut [T]) -> RecvPlan<'a, T> {
        debug_assert!(count >= 0);
        RecvPlan { src, count, vals }
    }
}

/// The caller-owned send side of a variable-size exchange.
///
/// The block for `dest[i]` occupies `counts[i]` elements of `vals` starting
/// at element offset `displs[i]`. Destinations must be ordered so that ranks
/// sharing a node are contiguous.
pub struct SendPlanV<'a, T> {
    dest: &'a [Rank],
    counts: &'a [Count],
    displs: &'a [Count],
    vals: &'a [T],
}

impl<'a, T: Equivalence> SendPlanV<'a, T> {
    /// A send plan delivering `counts[i]` elements at offset `displs[i]` of
    /// `vals` to `dest[i]`.
    pub fn new(
        dest: &'a [Rank],
        counts: &'a [Count],
        displs: &'a [Count],
        vals: &'a [T],
    ) -> SendPlanV<'a, T> {
        debug_assert_eq!(counts.len(), dest.len());
        debug_assert_eq!(displs.len(), dest.len());
        debug_assert!(counts.iter().all(|&c| c >= 0));
        SendPlanV {
            dest,
            counts,
            displs,
            vals,
        }
    }

    /// Number of destinations.
    pub fn n_send(&self) -> usize {
        self.dest.len()
    }
}

/// The caller-allocated receive side of a variable-size exchange, filled by
/// the collective.
///
/// After the call, partner `i` contributed `counts[i]` elements at element
/// offset `displs[i]` of `vals`, with `displs[i + 1] = displs[i] +
/// counts[i]`; `displs` therefore needs room for one entry more than
/// partners are expected.
pub struct RecvPlanV<'a, T> {
    src: &'a mut [Rank],
    counts: &'a mut [Count],
    displs: &'a mut [Count],
    vals: &'a mut [T],
}

impl<'a, T: Equivalence> RecvPlanV<'a, T> {
    /// A receive skeleton over caller-allocated buffers.
    pub fn new(
        src: &'a mut [Rank],
        counts: &'a mut [Count],
        displs: &'a mut [Count],
        vals: &'a mut [T],
    ) -> RecvPlanV<'a, T> {
        RecvPlanV {
            src,
            counts,
            displs,
            vals,
        }
    }
}

/// Sizes discovered by a variable-size exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecvShape {
    /// Number of distinct senders discovered.
    pub n_recv: usize,
    /// Total number of elements received.
    pub recv_size: usize,
}

/// Sparse fixed-size all-to-all: delivers `send.count` elements to each
/// destination of the send plan and discovers this rank's senders.
///
/// Collective over the group of `xcomm`; every rank must pass the same
/// `count` values. Returns the number of discovered senders; `recv.src` and
/// `recv.vals` hold their ranks and payloads in arrival order.
///
/// Dispatches to [`Algorithm::Rma`]; see there for the all-zero payload
/// restriction, and [`alltoall_crs_with`] to select another algorithm.
pub fn alltoall_crs<S, R>(
    send: &SendPlan<'_, S>,
    recv: &mut RecvPlan<'_, R>,
    xcomm: &mut ExtComm,
) -> Result<usize, Error>
where
    S: Equivalence,
    R: Equivalence,
{
    alltoall_crs_with(Algorithm::Rma, send, recv, None, xcomm)
}

/// Sparse fixed-size all-to-all with an explicit algorithm.
///
/// `n_recv` may pass a receiver count already known to the caller;
/// [`Algorithm::Personalized`] then skips its reduction. The other
/// algorithms discover the count themselves and ignore it.
pub fn alltoall_crs_with<S, R>(
    algorithm: Algorithm,
    send: &SendPlan<'_, S>,
    recv: &mut RecvPlan<'_, R>,
    n_recv: Option<usize>,
    xcomm: &mut ExtComm,
) -> Result<usize, Error>
where
    S: Equivalence,
    R: Equivalence,
{
    match algorithm {
        Algorithm::Rma => crs::alltoall_crs_rma(send, recv, false, xcomm),
        Algorithm::RmaMarked => crs::alltoall_crs_rma(send, recv, true, xcomm),
        Algorithm::Personalized => crs::alltoall_crs_personalized(send, recv, n_recv, xcomm),
        Algorithm::Nonblocking => crs::alltoall_crs_nonblocking(send, recv, xcomm),
    }
}

/// Sparse variable-size all-to-all: delivers `send.counts[i]` elements to
/// `send.dest[i]` and discovers this rank's senders along with their
/// contribution sizes.
///
/// `recv_size` may pass the total element count already known to the caller;
/// when `None` it is computed by reduction. Uses the personalized algorithm
/// (the reference default for variable-size exchanges).
pub fn alltoallv_crs<S, R>(
    send: &SendPlanV<'_, S>,
    recv: &mut RecvPlanV<'_, R>,
    recv_size: Option<usize>,
    xcomm: &mut ExtComm,
) -> Result<RecvShape, Error>
where
    S: Equivalence,
    R: Equivalence,
{
    crs::alltoallv_crs_personalized(send, recv, recv_size, xcomm)
}
