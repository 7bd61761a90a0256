//! Point to point communication
//!
//! Endpoints of communication are described by types that implement the
//! [`Source`] and [`Destination`] traits. Communication operations are
//! implemented as default methods on those traits.
//!
//! Transport is a tagged FIFO mailbox per rank. A standard-mode send copies
//! its payload into the destination mailbox and completes immediately; a
//! synchronous-mode send (the shape of `MPI_Issend`) completes only once the
//! matching receive has dequeued the message. Message order is preserved per
//! `(source, tag)` pair; no order holds between distinct sources.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use conv::ConvUtil;

use crate::datatype::{Buffer, BufferMut, Datatype};
use crate::error::Error;
use crate::request::{Flag, Request};
use crate::topology::{AnyProcess, AsCommunicator, Communicator, Process};
use crate::{Count, Rank, Tag};

/// Describes a received or probed message.
#[derive(Clone, Copy, Debug)]
pub struct Status {
    source: Rank,
    tag: Tag,
    bytes: usize,
}

impl Status {
    pub(crate) fn new(source: Rank, tag: Tag, bytes: usize) -> Status {
        Status { source, tag, bytes }
    }

    /// The rank of the message source.
    pub fn source_rank(&self) -> Rank {
        self.source
    }

    /// The message tag.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// The message length in bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Number of elements of `datatype` contained in the message.
    ///
    /// This is the get-count operation: the byte length of the message
    /// divided by the element width.
    pub fn count(&self, datatype: Datatype) -> Count {
        debug_assert_eq!(self.bytes % datatype.size(), 0);
        (self.bytes / datatype.size())
            .value_as()
            .expect("message length exceeds the range of Count")
    }
}

/// One message in flight.
struct Envelope {
    source: Rank,
    tag: Tag,
    payload: Box<[u8]>,
    /// Present for synchronous-mode sends; set when the receive dequeues.
    token: Option<Arc<Flag>>,
}

/// The tagged FIFO receive queue of one rank.
pub(crate) struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    arrived: Condvar,
}

impl Mailbox {
    pub(crate) fn new() -> Mailbox {
        Mailbox {
            queue: Mutex::new(VecDeque::new()),
            arrived: Condvar::new(),
        }
    }

    fn push(&self, envelope: Envelope) {
        let mut queue = self.queue.lock().expect("mailbox mutex poisoned");
        queue.push_back(envelope);
        self.arrived.notify_all();
    }

    fn matching(queue: &VecDeque<Envelope>, source: Option<Rank>, tag: Tag) -> Option<usize> {
        queue
            .iter()
            .position(|e| e.tag == tag && source.map_or(true, |s| e.source == s))
    }
}

impl Communicator {
    /// Places a message in the destination's mailbox.
    pub(crate) fn deliver(&self, dest: Rank, tag: Tag, bytes: &[u8], token: Option<Arc<Flag>>) {
        debug_assert!(0 <= dest && dest < self.size());
        self.state.mailboxes[dest as usize].push(Envelope {
            source: self.rank(),
            tag,
            payload: bytes.into(),
            token,
        });
    }

    /// Blocks until a matching message is pending, without dequeuing it.
    pub(crate) fn probe(&self, source: Option<Rank>, tag: Tag) -> Status {
        let mailbox = &self.state.mailboxes[self.rank() as usize];
        let mut queue = mailbox.queue.lock().expect("mailbox mutex poisoned");
        loop {
            if let Some(pos) = Mailbox::matching(&queue, source, tag) {
                let envelope = &queue[pos];
                return Status::new(envelope.source, envelope.tag, envelope.payload.len());
            }
            queue = mailbox.arrived.wait(queue).expect("mailbox mutex poisoned");
        }
    }

    /// Like [`probe`](Communicator::probe), but returns immediately.
    pub(crate) fn try_probe(&self, source: Option<Rank>, tag: Tag) -> Option<Status> {
        let mailbox = &self.state.mailboxes[self.rank() as usize];
        let queue = mailbox.queue.lock().expect("mailbox mutex poisoned");
        Mailbox::matching(&queue, source, tag)
            .map(|pos| Status::new(queue[pos].source, queue[pos].tag, queue[pos].payload.len()))
    }

    /// Blocks until a matching message arrives and copies it into `buf`.
    pub(crate) fn dequeue(
        &self,
        source: Option<Rank>,
        tag: Tag,
        buf: &mut [u8],
    ) -> Result<Status, Error> {
        let mailbox = &self.state.mailboxes[self.rank() as usize];
        let mut queue = mailbox.queue.lock().expect("mailbox mutex poisoned");
        let envelope = loop {
            if let Some(pos) = Mailbox::matching(&queue, source, tag) {
                break queue.remove(pos).expect("matched envelope vanished");
            }
            queue = mailbox.arrived.wait(queue).expect("mailbox mutex poisoned");
        };
        drop(queue);

        // The send is matched as soon as the message leaves the queue.
        if let Some(flag) = &envelope.token {
            flag.set();
        }
        if envelope.payload.len() > buf.len() {
            return Err(Error::Truncated {
                got: envelope.payload.len(),
                capacity: buf.len(),
            });
        }
        buf[..envelope.payload.len()].copy_from_slice(&envelope.payload);
        Ok(Status::new(envelope.source, envelope.tag, envelope.payload.len()))
    }
}

/// Something that can be used as the destination in a point to point send
/// operation
pub trait Destination: AsCommunicator {
    /// `Rank` that identifies the destination
    fn destination_rank(&self) -> Rank;

    /// Blocking standard-mode send.
    ///
    /// The transport buffers eagerly, so the call returns as soon as `buf`
    /// is reusable.
    fn send_with_tag<Buf>(&self, buf: &Buf, tag: Tag)
    where
        Buf: Buffer + ?Sized,
    {
        self.as_communicator()
            .deliver(self.destination_rank(), tag, buf.as_bytes(), None);
    }

    /// Nonblocking standard-mode send.
    ///
    /// The payload is copied out before the call returns, so the request
    /// completes immediately.
    fn immediate_send_with_tag<Buf>(&self, buf: &Buf, tag: Tag) -> Request
    where
        Buf: Buffer + ?Sized,
    {
        self.as_communicator()
            .deliver(self.destination_rank(), tag, buf.as_bytes(), None);
        Request::ready()
    }

    /// Nonblocking synchronous-mode send.
    ///
    /// The returned request completes only once the destination has matched
    /// the message with a receive.
    fn immediate_synchronous_send_with_tag<Buf>(&self, buf: &Buf, tag: Tag) -> Request
    where
        Buf: Buffer + ?Sized,
    {
        let flag = Flag::shared();
        self.as_communicator().deliver(
            self.destination_rank(),
            tag,
            buf.as_bytes(),
            Some(Arc::clone(&flag)),
        );
        Request::pending(flag)
    }
}

impl Destination for Process<'_> {
    fn destination_rank(&self) -> Rank {
        self.rank()
    }
}

/// Something that can be used as the source in a point to point receive
/// operation
pub trait Source: AsCommunicator {
    /// `Rank` to accept messages from; `None` matches any source.
    fn source_rank(&self) -> Option<Rank>;

    /// Blocks until a message with tag `tag` is pending from this source and
    /// returns its `Status` without receiving it.
    ///
    /// A subsequent receive from `Status::source_rank` with the same tag is
    /// guaranteed to match the probed message, since ranks are
    /// single-threaded.
    fn probe_with_tag(&self, tag: Tag) -> Status {
        self.as_communicator().probe(self.source_rank(), tag)
    }

    /// Like [`probe_with_tag`](Source::probe_with_tag), but returns `None`
    /// instead of blocking when no matching message is pending.
    fn immediate_probe_with_tag(&self, tag: Tag) -> Option<Status> {
        self.as_communicator().try_probe(self.source_rank(), tag)
    }

    /// Blocks until a message with tag `tag` arrives from this source and
    /// receives it into `buf`.
    ///
    /// Fails with [`Error::Truncated`] if the message is longer than `buf`.
    fn receive_into_with_tag<Buf>(&self, buf: &mut Buf, tag: Tag) -> Result<Status, Error>
    where
        Buf: BufferMut + ?Sized,
    {
        self.as_communicator()
            .dequeue(self.source_rank(), tag, buf.as_bytes_mut())
    }
}

impl Source for Process<'_> {
    fn source_rank(&self) -> Option<Rank> {
        Some(self.rank())
    }
}

impl Source for AnyProcess<'_> {
    fn source_rank(&self) -> Option<Rank> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::Equivalence;
    use crate::environment::{self, Config};

    const TAG: Tag = 17;

    #[test]
    fn send_probe_receive() {
        environment::run(Config::new(2), |world| {
            if world.rank() == 0 {
                world.process_at_rank(1).send_with_tag(&[1i32, 2, 3][..], TAG);
            } else {
                let status = world.any_process().probe_with_tag(TAG);
                assert_eq!(status.source_rank(), 0);
                assert_eq!(status.count(i32::equivalent_datatype()), 3);

                let mut vals = [0i32; 3];
                let status = world
                    .process_at_rank(status.source_rank())
                    .receive_into_with_tag(&mut vals[..], TAG)
                    .unwrap();
                assert_eq!(vals, [1, 2, 3]);
                assert_eq!(status.bytes(), 12);
            }
        });
    }

    #[test]
    fn fifo_per_source() {
        environment::run(Config::new(2), |world| {
            if world.rank() == 0 {
                world.process_at_rank(1).send_with_tag(&[10u8][..], TAG);
                world.process_at_rank(1).send_with_tag(&[20u8][..], TAG);
            } else {
                let mut first = [0u8];
                let mut second = [0u8];
                world
                    .any_process()
                    .receive_into_with_tag(&mut first[..], TAG)
                    .unwrap();
                world
                    .any_process()
                    .receive_into_with_tag(&mut second[..], TAG)
                    .unwrap();
                assert_eq!((first[0], second[0]), (10, 20));
            }
        });
    }

    #[test]
    fn truncated_receive() {
        environment::run(Config::new(2), |world| {
            if world.rank() == 0 {
                world.process_at_rank(1).send_with_tag(&[0u8; 4][..], TAG);
            } else {
                let mut small = [0u8; 2];
                let err = world
                    .process_at_rank(0)
                    .receive_into_with_tag(&mut small[..], TAG)
                    .unwrap_err();
                assert_eq!(err, crate::error::Error::Truncated { got: 4, capacity: 2 });
            }
        });
    }

    #[test]
    fn self_send() {
        environment::run(Config::new(1), |world| {
            world.process_at_rank(0).send_with_tag(&[7u64][..], TAG);
            assert!(world.any_process().immediate_probe_with_tag(TAG).is_some());
            let mut val = [0u64];
            world
                .process_at_rank(0)
                .receive_into_with_tag(&mut val[..], TAG)
                .unwrap();
            assert_eq!(val[0], 7);
            assert!(world.any_process().immediate_probe_with_tag(TAG).is_none());
        });
    }
}
