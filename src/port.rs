//! Platform adapter: the injected primitives the engine runs on.
//!
//! The protocol core never touches the clock, threads, timers, or CRC
//! hardware directly; it goes through a [`Port`] handed to
//! [`crate::session::Session::create`]. Production code uses [`StdPort`];
//! tests substitute a deterministic fake to drive the engine without real
//! time or threads.

use crate::error::{Error, Result};
use crate::event::{BoundedQueue, EventQueue};
use crc::{CRC_16_XMODEM, Crc};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Worker thread configuration, carried through from the session config.
///
/// `priority` is a hint for ports that can honor it; [`StdPort`] cannot
/// (std exposes no priority API) and ignores it. A `stack_size` of zero
/// means the platform default.
#[derive(Debug, Clone)]
pub struct ThreadConfig {
    pub name: String,
    pub priority: i32,
    pub stack_size: usize,
}

impl Default for ThreadConfig {
    fn default() -> ThreadConfig {
        ThreadConfig { name: "bcp-worker".into(), priority: 0, stack_size: 0 }
    }
}

pub type TimerCallback = Box<dyn Fn() + Send + Sync + 'static>;

/// A one-shot timer. `start` arms (or re-arms) it to fire once after
/// `period_ms`; `stop` cancels a pending fire; dropping the handle destroys
/// the timer.
pub trait PortTimer: Send {
    fn start(&self, period_ms: u32);
    fn stop(&self);
}

/// Handle to a spawned thread; `join` consumes it and blocks until the
/// thread finishes.
pub trait PortThread: Send {
    fn join(self: Box<Self>);
}

/// The capability bundle injected per session.
pub trait Port: Send + Sync + 'static {
    /// Monotonic milliseconds. Wraps; compare via signed difference.
    fn now_ms(&self) -> u32;

    /// Blocks the calling thread. Used only while tearing a session down.
    fn sleep_ms(&self, ms: u32);

    /// CRC-16 over `data`: poly 0x1021, init 0x0000, no reflection, no
    /// final XOR.
    fn crc16(&self, data: &[u8]) -> u16;

    /// A bounded two-priority event queue.
    fn queue_create(&self, capacity: usize) -> Result<Box<dyn EventQueue>>;

    /// A one-shot timer invoking `callback` from an arbitrary thread.
    fn timer_create(&self, callback: TimerCallback) -> Result<Box<dyn PortTimer>>;

    /// A named worker thread running `body` to completion.
    fn thread_spawn(
        &self,
        config: &ThreadConfig,
        body: Box<dyn FnOnce() + Send>,
    ) -> Result<Box<dyn PortThread>>;
}

static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Default port backed by `std::thread`, `parking_lot`, and the `crc`
/// crate.
pub struct StdPort {
    epoch: Instant,
}

impl StdPort {
    pub fn new() -> StdPort {
        StdPort { epoch: Instant::now() }
    }
}

impl Default for StdPort {
    fn default() -> StdPort {
        StdPort::new()
    }
}

impl Port for StdPort {
    fn now_ms(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }

    fn sleep_ms(&self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }

    fn crc16(&self, data: &[u8]) -> u16 {
        CRC16.checksum(data)
    }

    fn queue_create(&self, capacity: usize) -> Result<Box<dyn EventQueue>> {
        Ok(Box::new(BoundedQueue::new(capacity)))
    }

    fn timer_create(&self, callback: TimerCallback) -> Result<Box<dyn PortTimer>> {
        StdTimer::spawn(callback).map(|t| Box::new(t) as Box<dyn PortTimer>)
    }

    fn thread_spawn(
        &self,
        config: &ThreadConfig,
        body: Box<dyn FnOnce() + Send>,
    ) -> Result<Box<dyn PortThread>> {
        let mut builder = thread::Builder::new().name(config.name.clone());
        if config.stack_size > 0 {
            builder = builder.stack_size(config.stack_size);
        }
        let handle = builder.spawn(body).map_err(|_| Error::Port("thread spawn failed"))?;
        Ok(Box::new(StdThread { handle: Some(handle) }))
    }
}

struct StdThread {
    handle: Option<thread::JoinHandle<()>>,
}

impl PortThread for StdThread {
    fn join(mut self: Box<Self>) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct TimerState {
    deadline: Option<Instant>,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    cond: Condvar,
}

/// One-shot timer on a dedicated thread, armed and disarmed through a
/// condvar.
struct StdTimer {
    shared: Arc<TimerShared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl StdTimer {
    fn spawn(callback: TimerCallback) -> Result<StdTimer> {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState { deadline: None, shutdown: false }),
            cond: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("bcp-timer".into())
            .spawn(move || StdTimer::run(worker_shared, callback))
            .map_err(|_| Error::Port("timer thread spawn failed"))?;
        Ok(StdTimer { shared, thread: Some(thread) })
    }

    fn run(shared: Arc<TimerShared>, callback: TimerCallback) {
        let mut state = shared.state.lock();
        loop {
            if state.shutdown {
                return;
            }
            let Some(deadline) = state.deadline else {
                shared.cond.wait(&mut state);
                continue;
            };
            if Instant::now() < deadline {
                shared.cond.wait_until(&mut state, deadline);
                continue;
            }
            state.deadline = None;
            drop(state);
            callback();
            state = shared.state.lock();
        }
    }
}

impl PortTimer for StdTimer {
    fn start(&self, period_ms: u32) {
        let mut state = self.shared.state.lock();
        state.deadline = Some(Instant::now() + Duration::from_millis(u64::from(period_ms)));
        self.shared.cond.notify_one();
    }

    fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.deadline = None;
        self.shared.cond.notify_one();
    }
}

impl Drop for StdTimer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.cond.notify_one();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
