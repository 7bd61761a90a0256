//! Environmental management
//!
//! This module spins up the in-process message-passing runtime: one thread
//! per rank, each handed its own [`Communicator`] onto the shared group
//! state. [`run`] blocks until every rank's logic returns and collects the
//! per-rank results in rank order.

use std::panic;
use std::sync::Arc;
use std::thread;

use crate::topology::{Communicator, GroupState};
use crate::Rank;

/// Describes the group to spin up.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub(crate) size: usize,
    pub(crate) ranks_per_node: usize,
}

impl Config {
    /// A group of `size` ranks, all sharing one node.
    pub fn new(size: usize) -> Config {
        assert!(size > 0, "a group must have at least one rank");
        Config {
            size,
            ranks_per_node: size,
        }
    }

    /// Spreads the ranks over nodes of `ranks_per_node` ranks each, in SMP
    /// order: rank `r` lives on node `r / ranks_per_node`.
    pub fn ranks_per_node(mut self, ranks_per_node: usize) -> Config {
        assert!(ranks_per_node > 0, "a node must hold at least one rank");
        self.ranks_per_node = ranks_per_node;
        self
    }
}

/// Initializes communication and executes a computation on every rank.
///
/// Spawns one thread per rank, invokes `logic` with that rank's
/// [`Communicator`], joins all threads, and returns their results in rank
/// order. A panic on any rank is resumed on the caller.
pub fn run<T, F>(config: Config, logic: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(Communicator) -> T + Send + Sync + 'static,
{
    let state = Arc::new(GroupState::new(config.size, config.ranks_per_node));
    let logic = Arc::new(logic);

    let guards: Vec<_> = (0..config.size)
        .map(|rank| {
            let state = Arc::clone(&state);
            let logic = Arc::clone(&logic);
            thread::Builder::new()
                .name(format!("rank-{}", rank))
                .spawn(move || (*logic)(Communicator::new(state, rank as Rank)))
                .expect("failed to spawn rank thread")
        })
        .collect();

    guards
        .into_iter()
        .map(|guard| match guard.join() {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        })
        .collect()
}
