#![deny(missing_docs)]
#![warn(missing_copy_implementations)]
#![warn(trivial_casts)]
#![warn(unused_import_braces)]
#![warn(unused_qualifications)]

//! Sparse compressed-row-storage (CRS) collectives over a message-passing
//! runtime.
//!
//! In a dense all-to-all every one of `P` processes posts a message to every
//! other. At scale this wastes time and memory when each process actually
//! converses with only a small neighborhood. This library provides two
//! primitives that exchange data only between processes with a nonzero
//! relationship, and in which the *receiver discovers its own partner set*:
//!
//! - [`neighborhood::alltoall_crs`] for fixed-size messages, and
//! - [`neighborhood::alltoallv_crs`] for variable-size messages.
//!
//! Partner discovery is solved by interchangeable algorithms: a one-sided
//! window protocol, a personalized protocol built on an all-reduce, and a
//! nonblocking protocol built on synchronous sends and a nonblocking
//! barrier; see [`neighborhood::Algorithm`]. All of them deliver the same
//! multiset of `(source, payload)` pairs while moving only `O(neighbors)`
//! data per process.
//!
//! The collectives run on an in-process message-passing runtime in which each
//! rank is a thread, joined by tagged FIFO mailboxes, a one-sided byte
//! window, and the usual collective primitives. The runtime surface follows
//! MPI conventions: `Communicator`, `Process`, probe and receive with
//! `Status`, `immediate_*` nonblocking operations returning `Request`s.
//!
//! # Usage
//!
//! ```
//! use sparse_coll::environment::{self, Config};
//! use sparse_coll::neighborhood::{alltoall_crs, ExtComm, RecvPlan, SendPlan};
//! use sparse_coll::Rank;
//!
//! // A ring: every rank sends `rank + 1` to its right neighbor.
//! let results = environment::run(Config::new(3), |world| {
//!     let rank = world.rank();
//!     let size = world.size();
//!     let mut xcomm = ExtComm::new(world);
//!
//!     let dest = [(rank + 1) % size];
//!     let vals = [rank + 1];
//!     let mut src = [0 as Rank; 3];
//!     let mut recv_vals = [0i32; 3];
//!
//!     let send = SendPlan::new(&dest, 1, &vals);
//!     let mut recv = RecvPlan::new(&mut src, 1, &mut recv_vals);
//!     let n_recv = alltoall_crs(&send, &mut recv, &mut xcomm).unwrap();
//!     (n_recv, src[0], recv_vals[0])
//! });
//!
//! for (rank, (n_recv, src, val)) in results.into_iter().enumerate() {
//!     let left = ((rank + 2) % 3) as Rank;
//!     assert_eq!((n_recv, src, val), (1, left, left + 1));
//! }
//! ```

pub mod collective;
pub mod datatype;
pub mod environment;
pub mod error;
pub mod neighborhood;
pub mod point_to_point;
pub mod request;
pub mod topology;
pub mod window;

/// Re-exports all traits.
pub mod traits {
    pub use crate::collective::CommunicatorCollectives;
    pub use crate::datatype::{Buffer, BufferMut, Equivalence};
    pub use crate::point_to_point::{Destination, Source};
    pub use crate::topology::AsCommunicator;
}

/// Message tags reserved by this library.
///
/// Library-internal traffic draws its tags from a single contiguous block so
/// that collision with application traffic is a one-line check: application
/// tags must stay below [`RESERVED_BASE`](self::RESERVED_BASE).
pub mod tags {
    use crate::Tag;

    /// First tag of the block reserved for library-internal traffic.
    pub const RESERVED_BASE: Tag = 928_400;

    /// Payload traffic of the personalized sparse exchange.
    pub const ALLTOALL_PERSONALIZED: Tag = RESERVED_BASE + 31;

    /// Payload traffic of the nonblocking sparse exchange.
    pub const ALLTOALL_NONBLOCKING: Tag = RESERVED_BASE + 32;

    /// Contributions of an in-place all-reduce.
    pub(crate) const ALL_REDUCE: Tag = RESERVED_BASE + 1;
}

/// Identifies a participant within a process group.
pub type Rank = i32;
/// Encodes number of elements in multi-element messages.
pub type Count = i32;
/// Can be used to tag messages on the sender side and match on the receiver side.
pub type Tag = i32;
