//! Organizing participants as groups and communicators
//!
//! All ranks partaking in a computation are organized in a context handed to
//! each of them by [`environment::run`](crate::environment::run) as a
//! [`Communicator`]. Ranks can be addressed via their [`Rank`](crate::Rank)
//! within the communicator; this information is encapsulated in a
//! [`Process`]. A [`Group`] is a plain set of ranks without communication
//! facilities, used for example for the sub-group of ranks sharing a node.

use std::cell::Cell;
use std::sync::{Arc, Barrier};

use crate::collective::IbarrierBoard;
use crate::point_to_point::Mailbox;
use crate::window::Registry;
use crate::Rank;

/// Shared state of one process group.
///
/// One instance exists per group; every rank holds it through an `Arc` inside
/// its `Communicator`.
pub(crate) struct GroupState {
    pub(crate) size: usize,
    /// Node identifier per rank; ranks are SMP-ordered across nodes.
    pub(crate) node_of: Vec<usize>,
    pub(crate) mailboxes: Vec<Mailbox>,
    pub(crate) barrier: Barrier,
    pub(crate) ibarrier: IbarrierBoard,
    pub(crate) windows: Registry,
}

impl GroupState {
    pub(crate) fn new(size: usize, ranks_per_node: usize) -> GroupState {
        GroupState {
            size,
            node_of: (0..size).map(|rank| rank / ranks_per_node).collect(),
            mailboxes: (0..size).map(|_| Mailbox::new()).collect(),
            barrier: Barrier::new(size),
            ibarrier: IbarrierBoard::new(),
            windows: Registry::new(),
        }
    }
}

/// Something that has a communicator associated with it
pub trait AsCommunicator {
    /// Returns the associated communicator.
    fn as_communicator(&self) -> &Communicator;
}

/// A rank's handle onto its process group.
///
/// The handle is single-threaded by construction: it is neither `Sync` nor
/// clonable, and at most one collective call per handle may be in progress.
pub struct Communicator {
    pub(crate) state: Arc<GroupState>,
    rank: Rank,
    ibarrier_epoch: Cell<usize>,
    window_seq: Cell<usize>,
}

impl Communicator {
    pub(crate) fn new(state: Arc<GroupState>, rank: Rank) -> Communicator {
        Communicator {
            state,
            rank,
            ibarrier_epoch: Cell::new(0),
            window_seq: Cell::new(0),
        }
    }

    /// The rank of this participant.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of ranks in the group.
    pub fn size(&self) -> Rank {
        self.state.size as Rank
    }

    /// Returns a handle identifying the process at `rank`.
    pub fn process_at_rank(&self, rank: Rank) -> Process<'_> {
        debug_assert!(0 <= rank && rank < self.size());
        Process { comm: self, rank }
    }

    /// Returns a handle identifying no process in particular.
    pub fn any_process(&self) -> AnyProcess<'_> {
        AnyProcess(self)
    }

    /// The node identifier of `rank`.
    pub fn node_of(&self, rank: Rank) -> usize {
        self.state.node_of[rank as usize]
    }

    /// The node identifier of this rank.
    pub fn this_node(&self) -> usize {
        self.node_of(self.rank)
    }

    /// The group of ranks sharing this rank's node.
    pub fn node_group(&self) -> Group {
        let node = self.this_node();
        let members: Vec<Rank> = (0..self.size())
            .filter(|&r| self.state.node_of[r as usize] == node)
            .collect();
        let position = members.iter().position(|&r| r == self.rank);
        Group { members, position }
    }

    pub(crate) fn next_ibarrier_epoch(&self) -> usize {
        let epoch = self.ibarrier_epoch.get();
        self.ibarrier_epoch.set(epoch + 1);
        epoch
    }

    pub(crate) fn next_window_seq(&self) -> usize {
        let seq = self.window_seq.get();
        self.window_seq.set(seq + 1);
        seq
    }
}

impl AsCommunicator for Communicator {
    fn as_communicator(&self) -> &Communicator {
        self
    }
}

/// Identifies a certain process within a communicator.
#[derive(Clone, Copy)]
pub struct Process<'a> {
    comm: &'a Communicator,
    rank: Rank,
}

impl Process<'_> {
    /// The rank of the identified process.
    pub fn rank(&self) -> Rank {
        self.rank
    }
}

impl AsCommunicator for Process<'_> {
    fn as_communicator(&self) -> &Communicator {
        self.comm
    }
}

/// Identifies an arbitrary process, e.g. as the source in an any-source
/// receive operation.
#[derive(Clone, Copy)]
pub struct AnyProcess<'a>(pub(crate) &'a Communicator);

impl AsCommunicator for AnyProcess<'_> {
    fn as_communicator(&self) -> &Communicator {
        self.0
    }
}

/// A set of ranks, without communication facilities.
pub struct Group {
    members: Vec<Rank>,
    position: Option<usize>,
}

impl Group {
    /// Number of ranks in the group.
    pub fn size(&self) -> Rank {
        self.members.len() as Rank
    }

    /// Position of the calling rank within the group, if it is a member.
    pub fn rank(&self) -> Option<Rank> {
        self.position.map(|p| p as Rank)
    }

    /// Translates a position within the group to the global rank it denotes.
    pub fn translate_rank(&self, group_rank: Rank) -> Rank {
        self.members[group_rank as usize]
    }
}

#[cfg(test)]
mod tests {
    use crate::environment::{self, Config};

    #[test]
    fn ranks_and_sizes() {
        let seen = environment::run(Config::new(4), |world| (world.rank(), world.size()));
        for (rank, (r, s)) in seen.into_iter().enumerate() {
            assert_eq!(r, rank as i32);
            assert_eq!(s, 4);
        }
    }

    #[test]
    fn smp_node_mapping() {
        environment::run(Config::new(4).ranks_per_node(2), |world| {
            assert_eq!(world.node_of(0), 0);
            assert_eq!(world.node_of(1), 0);
            assert_eq!(world.node_of(2), 1);
            assert_eq!(world.node_of(3), 1);
            assert_eq!(world.this_node(), (world.rank() / 2) as usize);
        });
    }

    #[test]
    fn node_group_membership() {
        environment::run(Config::new(4).ranks_per_node(2), |world| {
            let group = world.node_group();
            assert_eq!(group.size(), 2);
            assert_eq!(group.rank(), Some(world.rank() % 2));
            let first = world.rank() - world.rank() % 2;
            assert_eq!(group.translate_rank(0), first);
            assert_eq!(group.translate_rank(1), first + 1);
        });
    }
}
