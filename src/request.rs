//! Request objects for non-blocking operations
//!
//! Non-blocking operations return [`Request`] objects. The transport copies
//! payloads eagerly, so a request never borrows the buffers involved in its
//! operation; dropping an incomplete request is allowed (the operation still
//! completes on its own).
//!
//! A [`RequestPool`] is a growable owning sequence of requests cached on the
//! extended communicator, so that repeated collective calls amortize
//! allocations. It grows by doubling and never shrinks during a call.

use std::sync::{Arc, Condvar, Mutex};

use smallvec::SmallVec;

/// A completion token shared between an in-flight operation and its request.
pub(crate) struct Flag {
    state: Mutex<bool>,
    completed: Condvar,
}

impl Flag {
    pub(crate) fn shared() -> Arc<Flag> {
        Arc::new(Flag {
            state: Mutex::new(false),
            completed: Condvar::new(),
        })
    }

    pub(crate) fn set(&self) {
        let mut state = self.state.lock().expect("completion flag poisoned");
        *state = true;
        self.completed.notify_all();
    }

    fn get(&self) -> bool {
        *self.state.lock().expect("completion flag poisoned")
    }

    fn wait(&self) {
        let mut state = self.state.lock().expect("completion flag poisoned");
        while !*state {
            state = self.completed.wait(state).expect("completion flag poisoned");
        }
    }
}

/// A request object for a non-blocking operation.
#[must_use]
pub struct Request {
    /// `None` for operations that complete at posting time.
    flag: Option<Arc<Flag>>,
}

impl Request {
    /// A request that was complete at posting time.
    pub(crate) fn ready() -> Request {
        Request { flag: None }
    }

    /// A request completed by the other side through `flag`.
    pub(crate) fn pending(flag: Arc<Flag>) -> Request {
        Request { flag: Some(flag) }
    }

    /// Whether the associated operation has finished.
    pub fn test(&self) -> bool {
        self.flag.as_ref().map_or(true, |flag| flag.get())
    }

    /// Blocks until the associated operation has finished.
    pub fn wait(self) {
        if let Some(flag) = &self.flag {
            flag.wait();
        }
    }
}

/// A growable pool of in-flight requests.
///
/// `slot(i)` holds the request of the `i`-th operation posted by the current
/// collective call. The pool's capacity is always at least the number of
/// outstanding operations.
#[derive(Default)]
pub struct RequestPool {
    slots: SmallVec<[Option<Request>; 8]>,
}

impl RequestPool {
    /// An empty pool.
    pub fn new() -> RequestPool {
        RequestPool {
            slots: SmallVec::new(),
        }
    }

    /// Current capacity in slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Grows the pool to at least `n` slots, doubling to amortize repeated
    /// growth across calls.
    pub fn ensure(&mut self, n: usize) {
        if n > self.slots.len() {
            let target = n.max(self.slots.len() * 2);
            while self.slots.len() < target {
                self.slots.push(None);
            }
        }
    }

    /// Stores the request of the `i`-th posted operation.
    pub fn set(&mut self, i: usize, request: Request) {
        self.slots[i] = Some(request);
    }

    /// Whether the first `n` posted operations have all finished.
    pub fn test_all(&self, n: usize) -> bool {
        self.slots[..n]
            .iter()
            .all(|slot| slot.as_ref().map_or(true, Request::test))
    }

    /// Waits for the first `n` posted operations and clears their slots.
    pub fn wait_all(&mut self, n: usize) {
        for slot in &mut self.slots[..n] {
            if let Some(request) = slot.take() {
                request.wait();
            }
        }
    }
}
