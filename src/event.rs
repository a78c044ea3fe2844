//! Typed protocol events and the bounded queue that carries them.
//!
//! Every state transition of a session happens on its worker thread, which
//! drains a single bounded queue of [`Event`]s. Producers (the application
//! calling `send`, the link thread calling `input`, the handshake timer)
//! enqueue with timeout zero and report failure; the worker blocks on
//! `recv`. Control traffic goes in at the head of the queue so an ACK or a
//! handshake frame is never stuck behind a backlog of data slices.

use crate::pool::Block;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// One unit of work for the session worker.
#[derive(Debug)]
pub enum Event {
    /// Emit the handshake SYNC_REQ and arm the timeout.
    Open,
    /// A segmented application message, enqueued as one atomic batch.
    SendBatch(SendBatch),
    /// An MTU slice on the data path.
    Slice(Block),
    /// A cumulative acknowledgement frame.
    Ack(Block),
    /// A negative acknowledgement frame.
    Nack(Block),
    /// A handshake request frame.
    SyncReq(Block),
    /// A handshake acknowledgement frame.
    SyncAck(Block),
    /// The handshake timer fired.
    SyncTimeout,
    /// Stop the worker.
    Exit,
}

impl Event {
    /// Head-priority events preempt queued data traffic.
    pub fn is_priority(&self) -> bool {
        matches!(
            self,
            Event::Open
                | Event::Ack(_)
                | Event::Nack(_)
                | Event::SyncReq(_)
                | Event::SyncAck(_)
                | Event::SyncTimeout
                | Event::Exit
        )
    }
}

/// All frames of one segmented message. The batch travels as a single event
/// so concurrent senders can never interleave their messages; FSN and CRC
/// assignment happens on the worker, in emission order.
pub struct SendBatch {
    /// Permit from the send-batch pool; bounds concurrent batches.
    pub permit: Block,
    /// Packed data frames, FSN and CRC still unassigned.
    pub frames: Vec<Block>,
}

impl fmt::Debug for SendBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendBatch").field("frames", &self.frames.len()).finish()
    }
}

/// Outcome of [`EventQueue::recv`].
#[derive(Debug)]
pub enum Recv {
    Event(Event),
    TimedOut,
    /// The queue was closed; no further events will arrive.
    Closed,
}

/// Bounded blocking event queue with a head-priority lane.
///
/// `send` appends at the tail (FIFO among normal events); `send_prior`
/// pushes at the head, so head events are mutually last-in-first-out.
/// A `timeout` of `Some(Duration::ZERO)` makes the call non-blocking and
/// `None` blocks indefinitely. On failure the event is handed back to the
/// caller so any pooled memory it carries can be released.
pub trait EventQueue: Send + Sync {
    fn send(&self, event: Event, timeout: Option<Duration>) -> Result<(), Event>;
    fn send_prior(&self, event: Event, timeout: Option<Duration>) -> Result<(), Event>;
    fn recv(&self, timeout: Option<Duration>) -> Recv;
    /// Wakes all waiters; subsequent sends fail and `recv` drains the
    /// backlog then reports [`Recv::Closed`].
    fn close(&self);
}

struct QueueState {
    items: VecDeque<Event>,
    closed: bool,
}

/// The default [`EventQueue`], built on a mutex and two condvars.
pub struct BoundedQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl BoundedQueue {
    pub fn new(capacity: usize) -> BoundedQueue {
        BoundedQueue {
            state: Mutex::new(QueueState { items: VecDeque::with_capacity(capacity), closed: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    fn push(&self, event: Event, timeout: Option<Duration>, front: bool) -> Result<(), Event> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(event);
            }
            if state.items.len() < self.capacity {
                if front {
                    state.items.push_front(event);
                } else {
                    state.items.push_back(event);
                }
                self.not_empty.notify_one();
                return Ok(());
            }
            match deadline {
                None => {
                    self.not_full.wait(&mut state);
                }
                Some(deadline) => {
                    if self.not_full.wait_until(&mut state, deadline).timed_out() {
                        return Err(event);
                    }
                }
            }
        }
    }
}

impl EventQueue for BoundedQueue {
    fn send(&self, event: Event, timeout: Option<Duration>) -> Result<(), Event> {
        self.push(event, timeout, false)
    }

    fn send_prior(&self, event: Event, timeout: Option<Duration>) -> Result<(), Event> {
        self.push(event, timeout, true)
    }

    fn recv(&self, timeout: Option<Duration>) -> Recv {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if let Some(event) = state.items.pop_front() {
                self.not_full.notify_one();
                return Recv::Event(event);
            }
            if state.closed {
                return Recv::Closed;
            }
            match deadline {
                None => {
                    self.not_empty.wait(&mut state);
                }
                Some(deadline) => {
                    if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                        return Recv::TimedOut;
                    }
                }
            }
        }
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}
