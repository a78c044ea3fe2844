//! The session object: public API, the worker, and the handshake
//! controller.
//!
//! A session owns one worker thread, one bounded event queue, three memory
//! pools, and a one-shot handshake timer. The public calls (`open`, `send`,
//! `input`) are producers: they validate, take pooled memory, and enqueue;
//! the worker is the only code that mutates protocol state. `close` (or
//! dropping the session) posts an exit event and joins the worker.

use crate::error::{Error, Result};
use crate::event::{Event, EventQueue, Recv, SendBatch};
use crate::frame::{self, FrameHeader, FrameKind, Fsn};
use crate::outgoing::{self, Outgoing};
use crate::pool::{Block, BlockPool};
use crate::port::{Port, PortThread, PortTimer, ThreadConfig};
use crate::reassembly::{Delivery, Reassembler, SliceOutcome};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Result of an asynchronous [`Session::open`], reported through the
/// opened callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum OpenStatus {
    Ok = 0,
    /// No pooled memory for the handshake frame.
    MemFail = -3,
    /// The link refused the handshake frame.
    SendFail = -4,
    /// No SYNC_ACK within the requested timeout.
    RspTimeout = -5,
}

/// Session life-cycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Created; only a handshake may be initiated.
    Stop = 0,
    /// SYNC_REQ emitted, waiting for the SYNC_ACK.
    Handshake = 1,
    /// Established; data may flow both ways.
    Done = 2,
}

impl Status {
    fn from_u8(val: u8) -> Status {
        match val {
            1 => Status::Handshake,
            2 => Status::Done,
            _ => Status::Stop,
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// MTU packets per frame, 1..=5. MFS = `mtu * mfs_scale`.
    pub mfs_scale: u8,
    /// True effective link MTU, e.g. 20 for BLE 4.x GATT.
    pub mtu: u16,
    /// Largest application message, bytes. Drives pool sizing; values above
    /// 8192 work but cost proportionally more memory.
    pub mal: u32,
    pub thread: ThreadConfig,
}

/// Link-facing callbacks. Implementors hold whatever user state they need;
/// both methods are invoked from session-internal threads.
pub trait SessionInterface: Send + Sync + 'static {
    /// Pushes one slice (at most MTU bytes) to the link. An error is
    /// treated as transient: data frames stay in flight and go out again
    /// on the next NACK.
    fn output(&self, data: &[u8]) -> Result<()>;

    /// A complete application message arrived.
    fn data_listener(&self, data: &[u8]);
}

type OpenedCallback = Box<dyn Fn(OpenStatus) + Send + Sync>;

const EVENT_QUEUE_DEPTH: usize = 16;
const SEND_BATCH_PERMITS: usize = 3;
const EXIT_POLL_STEP_MS: u32 = 10;
const EXIT_POLL_ROUNDS: u32 = 3;

/// State reachable from producer threads, the timer, and the worker.
struct Shared {
    mtu: usize,
    mfs: usize,
    mal: usize,
    status: AtomicU8,
    exit_flag: AtomicBool,
    sync_timeout_ms: AtomicU32,
    frame_pool: BlockPool,
    mtu_pool: BlockPool,
    permit_pool: BlockPool,
    queue: Box<dyn EventQueue>,
    iface: Arc<dyn SessionInterface>,
    port: Arc<dyn Port>,
    timer: Mutex<Option<Box<dyn PortTimer>>>,
    opened: Mutex<Option<OpenedCallback>>,
}

impl Shared {
    fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: Status) {
        self.status.store(status as u8, Ordering::Release);
    }
}

/// One protocol endpoint over one logical channel.
///
/// Dropping the session tears it down; [`Session::close`] does the same
/// explicitly and is idempotent.
pub struct Session {
    shared: Arc<Shared>,
    worker: Mutex<Option<Box<dyn PortThread>>>,
    closed: AtomicBool,
}

impl Session {
    /// Builds a session: pools, event queue, handshake timer, and the
    /// worker thread. Any adapter failure surfaces here and nothing is
    /// left running.
    pub fn create(
        config: SessionConfig,
        iface: Arc<dyn SessionInterface>,
        port: Arc<dyn Port>,
    ) -> Result<Session> {
        validate(&config)?;
        let mtu = config.mtu as usize;
        let mfs = mtu * config.mfs_scale as usize;
        let mal = config.mal as usize;
        if mal > 8192 {
            warn!(mal, "mal above the recommended 8192 bytes");
        }

        let frame_pool = BlockPool::new(mfs, (mal / mfs + 1) * 4);
        let mtu_pool = BlockPool::new(mtu, config.mfs_scale as usize * 2);
        let permit_pool = BlockPool::new(0, SEND_BATCH_PERMITS);
        let queue = port.queue_create(EVENT_QUEUE_DEPTH)?;

        let shared = Arc::new(Shared {
            mtu,
            mfs,
            mal,
            status: AtomicU8::new(Status::Stop as u8),
            exit_flag: AtomicBool::new(false),
            sync_timeout_ms: AtomicU32::new(0),
            frame_pool,
            mtu_pool,
            permit_pool,
            queue,
            iface,
            port: Arc::clone(&port),
            timer: Mutex::new(None),
            opened: Mutex::new(None),
        });

        // The timer thread outlives nothing: it holds a weak reference so
        // a dead session cannot be kept alive by its own timeout.
        let weak = Arc::downgrade(&shared);
        let timer = port.timer_create(Box::new(move || {
            let Some(shared) = weak.upgrade() else { return };
            if shared
                .queue
                .send_prior(Event::SyncTimeout, Some(Duration::ZERO))
                .is_err()
            {
                warn!("handshake timeout event dropped");
            }
        }))?;
        *shared.timer.lock() = Some(timer);

        let worker_shared = Arc::clone(&shared);
        let worker = port.thread_spawn(&config.thread, Box::new(move || worker_main(worker_shared)))?;

        debug!(mtu, mfs, mal, "session created");
        Ok(Session {
            shared,
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn status(&self) -> Status {
        self.shared.status()
    }

    /// Starts the handshake. Requires a stopped session; the outcome
    /// arrives asynchronously through `opened`, which fires at most once
    /// per `open` call.
    pub fn open(
        &self,
        timeout_ms: u32,
        opened: impl Fn(OpenStatus) + Send + Sync + 'static,
    ) -> Result<()> {
        if self.shared.status() != Status::Stop {
            return Err(Error::AlreadyOpen);
        }
        self.shared.sync_timeout_ms.store(timeout_ms, Ordering::Relaxed);
        *self.shared.opened.lock() = Some(Box::new(opened));
        self.shared
            .queue
            .send_prior(Event::Open, Some(Duration::ZERO))
            .map_err(|_| Error::QueueFull)
    }

    /// Queues one application message for transmission. The whole message
    /// is segmented here (on the caller's thread) and enqueued atomically,
    /// so messages from concurrent senders never interleave.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::EmptyMessage);
        }
        if data.len() > self.shared.mal {
            return Err(Error::MessageTooLarge);
        }
        if self.shared.status() != Status::Done {
            return Err(Error::NotEstablished);
        }

        let batch = outgoing::segment(
            data,
            self.shared.mfs,
            &self.shared.frame_pool,
            &self.shared.permit_pool,
        )?;
        trace!(len = data.len(), frames = batch.frames.len(), "send batch queued");
        self.shared
            .queue
            .send(Event::SendBatch(batch), Some(Duration::ZERO))
            .map_err(|_| Error::QueueFull)
    }

    /// Feeds one link slice into the session. The slice is copied into a
    /// pooled buffer and classified by peeking at the magic head and ctrl
    /// byte: control frames jump the queue, data slices keep arrival
    /// order.
    ///
    /// A stopped session accepts only a SYNC_REQ (the passive side of the
    /// handshake never calls `open`); everything else is refused until a
    /// handshake is underway.
    pub fn input(&self, data: &[u8]) -> Result<()> {
        if data.len() > self.shared.mtu {
            return Err(Error::SliceTooLarge);
        }

        let mut block = self.shared.mtu_pool.acquire().ok_or(Error::PoolExhausted)?;
        block.write(data);
        let event = classify(block);
        if self.shared.status() == Status::Stop && !matches!(event, Event::SyncReq(_)) {
            return Err(Error::Stopped);
        }
        let sent = if event.is_priority() {
            self.shared.queue.send_prior(event, Some(Duration::ZERO))
        } else {
            self.shared.queue.send(event, Some(Duration::ZERO))
        };
        sent.map_err(|_| Error::QueueFull)
    }

    /// Tears the session down: stops the timer, posts an exit event, waits
    /// briefly for the worker to notice, then closes the queue and joins.
    /// Pending application messages are not flushed.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let timer = self.shared.timer.lock().take();
        drop(timer);

        if self
            .shared
            .queue
            .send_prior(Event::Exit, Some(Duration::ZERO))
            .is_err()
        {
            self.shared.queue.close();
        }
        for _ in 0..EXIT_POLL_ROUNDS {
            if self.shared.exit_flag.load(Ordering::Acquire) {
                break;
            }
            self.shared.port.sleep_ms(EXIT_POLL_STEP_MS);
        }
        if !self.shared.exit_flag.load(Ordering::Acquire) {
            self.shared.queue.close();
        }
        if let Some(worker) = self.worker.lock().take() {
            worker.join();
        }
        debug!("session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn validate(config: &SessionConfig) -> Result<()> {
    if config.mfs_scale == 0 || config.mfs_scale > 5 {
        return Err(Error::Config("mfs_scale must be in 1..=5"));
    }
    if config.mtu == 0 {
        return Err(Error::Config("mtu must be nonzero"));
    }
    let mfs = u32::from(config.mtu) * u32::from(config.mfs_scale);
    if mfs > u32::from(u16::MAX) {
        return Err(Error::Config("mtu * mfs_scale exceeds u16"));
    }
    if (mfs as usize) < frame::SYNC_REQ_FRAME_LEN {
        return Err(Error::Config("frame size below protocol overhead"));
    }
    if config.mal < mfs {
        return Err(Error::Config("mal must cover at least one frame"));
    }
    Ok(())
}

/// Routes an inbound slice by peeking at its header. Anything that is not
/// a well-formed control frame takes the normal data path; the reassembler
/// sorts out interior slices and noise.
fn classify(block: Block) -> Event {
    if block.len() >= frame::OVERHEAD
        && let Some(header) = FrameHeader::parse(&block)
    {
        match header.kind {
            FrameKind::Ack => return Event::Ack(block),
            FrameKind::Nack => return Event::Nack(block),
            FrameKind::SyncReq => return Event::SyncReq(block),
            FrameKind::SyncAck => return Event::SyncAck(block),
            _ => {}
        }
    }
    Event::Slice(block)
}

fn worker_main(shared: Arc<Shared>) {
    let mut core = Core {
        outgoing: Outgoing::new(),
        reassembler: Reassembler::new(shared.mal),
        handshake_started_ms: 0,
        exit: false,
        shared,
    };
    debug!("worker started");
    loop {
        match core.shared.queue.recv(None) {
            Recv::Event(event) => core.dispatch(event),
            Recv::Closed => break,
            Recv::TimedOut => continue,
        }
        if core.exit {
            break;
        }
    }
    core.shared.exit_flag.store(true, Ordering::Release);
    debug!("worker stopped");
}

/// Worker-owned protocol state. Only the worker thread ever touches it,
/// which is what lets every handler run lock-free.
struct Core {
    shared: Arc<Shared>,
    outgoing: Outgoing,
    reassembler: Reassembler,
    handshake_started_ms: u32,
    exit: bool,
}

impl Core {
    fn dispatch(&mut self, event: Event) {
        match event {
            Event::Open => self.on_open(),
            Event::SendBatch(batch) => self.on_send_batch(batch),
            Event::Slice(block) => self.on_slice(block),
            Event::Ack(block) => self.on_ack(block),
            Event::Nack(block) => self.on_nack(block),
            Event::SyncReq(block) => self.on_sync_req(block),
            Event::SyncAck(block) => self.on_sync_ack(block),
            Event::SyncTimeout => self.on_sync_timeout(),
            Event::Exit => self.exit = true,
        }
    }

    // ----- handshake controller -----

    fn on_open(&mut self) {
        let Some(mut block) = self.shared.frame_pool.acquire() else {
            error!("sync send: frame pool exhausted");
            self.notify_opened(OpenStatus::MemFail);
            return;
        };
        let fsn = self.outgoing.next_fsn();
        let sync_req = frame::encode_sync_req(fsn, self.shared.mfs as u16, self.shared.port.as_ref());
        block.write(&sync_req);

        if emit(&self.shared, &block).is_err() {
            error!(fsn = %fsn, "sync send failed");
            self.notify_opened(OpenStatus::SendFail);
            return;
        }

        self.outgoing.push_in_flight(fsn, block);
        self.shared.set_status(Status::Handshake);
        self.handshake_started_ms = self.shared.port.now_ms();
        let timeout_ms = self.shared.sync_timeout_ms.load(Ordering::Relaxed);
        if let Some(timer) = self.shared.timer.lock().as_ref() {
            timer.start(timeout_ms);
        }
        debug!(fsn = %fsn, timeout_ms, "sync request sent");
    }

    fn on_sync_req(&mut self, block: Block) {
        if !frame::verify(&block, self.shared.port.as_ref()) {
            error!("sync req crc mismatch");
            return;
        }
        let Some(header) = FrameHeader::parse(&block) else { return };
        if block.len() < frame::SYNC_REQ_FRAME_LEN {
            warn!(len = block.len(), "truncated sync req");
            return;
        }
        let peer_mfs = u16::from_le_bytes([block[frame::HEADER_LEN], block[frame::HEADER_LEN + 1]]);
        drop(block);

        // A repeated SYNC_REQ means the peer restarted: discard any
        // half-assembled state along with the old buffers.
        self.reassembler.arm(peer_mfs as usize, header.fsn.wrapping_add(1));

        let sync_ack = frame::encode_sync_ack(header.fsn, self.shared.port.as_ref());
        if emit(&self.shared, &sync_ack).is_err() {
            error!(fsn = %header.fsn, "sync ack send failed");
        }
        self.shared.set_status(Status::Done);
        debug!(peer_mfs, fsn = %header.fsn, "handshake request accepted");
    }

    fn on_sync_ack(&mut self, block: Block) {
        if !frame::verify(&block, self.shared.port.as_ref()) {
            error!("sync ack crc mismatch");
            return;
        }
        drop(block);

        if let Some(timer) = self.shared.timer.lock().as_ref() {
            timer.stop();
        }
        let released = self.outgoing.clear_in_flight();

        // The peer never advertises its MFS to the opening side; size the
        // frame buffer for a symmetric configuration. A later SYNC_REQ
        // from the peer re-arms with its advertised value.
        if !self.reassembler.is_armed() {
            let rcv_next = self.reassembler.rcv_next();
            self.reassembler.arm(self.shared.mfs, rcv_next);
        }

        self.shared.set_status(Status::Done);
        let elapsed = self.shared.port.now_ms().wrapping_sub(self.handshake_started_ms);
        debug!(elapsed_ms = elapsed, released, "handshake complete");
        self.notify_opened(OpenStatus::Ok);
    }

    fn on_sync_timeout(&mut self) {
        if self.shared.status() != Status::Handshake {
            return;
        }
        warn!("handshake response timed out");
        self.notify_opened(OpenStatus::RspTimeout);
    }

    fn notify_opened(&self, status: OpenStatus) {
        let callback = self.shared.opened.lock().take();
        if let Some(callback) = callback {
            callback(status);
        }
    }

    // ----- send path -----

    fn on_send_batch(&mut self, batch: SendBatch) {
        let SendBatch { permit, frames } = batch;
        for mut block in frames {
            let fsn = self.outgoing.next_fsn();
            frame::set_fsn(&mut block, fsn);
            frame::seal(&mut block, self.shared.port.as_ref());
            // Output failure is transient: the frame is in flight either
            // way and a NACK brings it back out.
            let _ = emit(&self.shared, &block);
            self.outgoing.push_in_flight(fsn, block);
        }
        drop(permit);
    }

    fn on_ack(&mut self, block: Block) {
        let Some(fsn) = self.control_fsn(block) else { return };
        let released = self.outgoing.handle_ack(fsn);
        trace!(ack = %fsn, released, in_flight = self.outgoing.in_flight_len(), "ack processed");
    }

    fn on_nack(&mut self, block: Block) {
        let Some(fsn) = self.control_fsn(block) else { return };
        let released = self.outgoing.handle_nack(fsn);
        debug!(
            nack = %fsn,
            released,
            resend = self.outgoing.in_flight_len(),
            "nack: re-emitting from requested frame"
        );
        for in_flight in self.outgoing.iter_in_flight() {
            let _ = emit(&self.shared, &in_flight.block);
        }
    }

    /// Validates an ACK/NACK frame and extracts the FSN it carries.
    fn control_fsn(&self, block: Block) -> Option<Fsn> {
        if block.len() < frame::CONTROL_FRAME_LEN {
            warn!(len = block.len(), "truncated ack/nack");
            return None;
        }
        if !frame::verify(&block, self.shared.port.as_ref()) {
            error!("ack/nack crc mismatch");
            return None;
        }
        Some(Fsn(block[frame::HEADER_LEN]))
    }

    // ----- receive path -----

    fn on_slice(&mut self, block: Block) {
        if !self.reassembler.is_armed() {
            error!("data slice before handshake; dropped");
            return;
        }
        match self.reassembler.push_slice(&block, self.shared.port.as_ref()) {
            SliceOutcome::Pending => {}
            SliceOutcome::Reject { expected } => {
                drop(block);
                self.send_control(FrameKind::Nack, expected);
            }
            SliceOutcome::Frame(completed) => {
                drop(block);
                // ACK first, then advance: a MAL overflow further down
                // still consumes the frame's sequence number.
                let acked = self.reassembler.rcv_next();
                self.send_control(FrameKind::Ack, acked);
                self.reassembler.advance_rcv_next();
                if let Delivery::Message(len) = self.reassembler.commit_frame(&completed) {
                    let iface = Arc::clone(&self.shared.iface);
                    iface.data_listener(self.reassembler.message(len));
                }
            }
        }
    }

    fn send_control(&self, kind: FrameKind, fsn: Fsn) {
        let control = frame::encode_control(kind, self.outgoing.snd_next(), fsn, self.shared.port.as_ref());
        if emit(&self.shared, &control).is_err() {
            error!(kind = ?kind, fsn = %fsn, "control frame send failed");
        }
    }
}

/// Pushes one frame to the link in MTU-sized slices.
fn emit(shared: &Shared, bytes: &[u8]) -> Result<()> {
    for chunk in bytes.chunks(shared.mtu) {
        if shared.iface.output(chunk).is_err() {
            warn!(frame_len = bytes.len(), "link output failed");
            return Err(Error::OutputFailed);
        }
    }
    Ok(())
}
