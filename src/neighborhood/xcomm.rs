//! The extended communicator
//!
//! Sparse collectives reuse scratch across calls: a one-sided window sized
//! for the exchange at hand, a growable pool of request handles, and the
//! lazily built group of ranks sharing this rank's node. [`ExtComm`] owns
//! that scratch and lends it to one collective call at a time.

use once_cell::sync::OnceCell;

use crate::request::RequestPool;
use crate::topology::{Communicator, Group};
use crate::window::Window;

/// A communicator extended with the scratch state of the sparse collectives.
///
/// Created around a [`Communicator`] before the first sparse collective and
/// reused for all subsequent calls; the scratch only grows as needed.
/// Concurrent collective calls on the same handle are not permitted.
pub struct ExtComm {
    comm: Communicator,
    requests: RequestPool,
    window: Option<Window>,
    local_group: OnceCell<Group>,
    rank_node: usize,
}

impl ExtComm {
    /// Wraps `comm`, with empty scratch.
    pub fn new(comm: Communicator) -> ExtComm {
        let rank_node = comm.this_node();
        ExtComm {
            comm,
            requests: RequestPool::new(),
            window: None,
            local_group: OnceCell::new(),
            rank_node,
        }
    }

    /// The underlying communicator.
    pub fn communicator(&self) -> &Communicator {
        &self.comm
    }

    /// The node identifier of this rank.
    pub fn rank_node(&self) -> usize {
        self.rank_node
    }

    /// The group of ranks sharing this rank's node, built on first use.
    pub fn local_group(&self) -> &Group {
        self.local_group.get_or_init(|| self.comm.node_group())
    }

    /// The communicator together with the request pool, for algorithms that
    /// post point to point operations.
    pub(crate) fn parts(&mut self) -> (&Communicator, &mut RequestPool) {
        (&self.comm, &mut self.requests)
    }

    /// The cached window, reallocated if capacity or granularity differ.
    ///
    /// Collective: every rank must request the same shape at the same point
    /// of the protocol, so teardown and reallocation happen group-wide.
    pub(crate) fn ensure_window(&mut self, bytes: usize, disp_unit: usize) -> &Window {
        if let Some(window) = &self.window {
            if window.bytes() != bytes || window.disp_unit() != disp_unit {
                self.window = None;
            }
        }
        if self.window.is_none() {
            self.window = Some(Window::allocate(&self.comm, bytes, disp_unit));
        }
        self.window.as_ref().expect("window just ensured")
    }
}
