//! # bcp: Block Communication Protocol
//!
//! A reliable, acknowledged message transport for unreliable, MTU-limited
//! links such as BLE GATT. One session per logical channel and peer: an
//! application message (up to the configured MAL) is segmented into framed,
//! CRC-protected chunks, carried as MTU slices, and reassembled on the far
//! side in order.
//!
//! ## Architecture
//!
//! - **Reliability**: cumulative ACKs plus go-back NACKs over a one-byte
//!   wrapping frame sequence number; retransmission is peer-triggered.
//! - **Concurrency**: one worker thread per session drains a bounded
//!   two-priority event queue and is the sole mutator of protocol state;
//!   API calls and the link feed are producers.
//! - **Memory**: all transient buffers come from fixed-block pools sized
//!   at session creation, so a long-running session never fragments the
//!   heap.
//! - **Portability**: clock, timer, threads, queue, and CRC are injected
//!   through the [`port::Port`] trait; [`port::StdPort`] is the default.
//!
//! ## Handshake
//!
//! One side calls [`session::Session::open`], which emits a SYNC_REQ
//! advertising the local maximum frame size. The peer sizes its receive
//! buffers from it, answers with SYNC_ACK, and both sides are established;
//! after that either side may send.

pub mod error;
pub mod event;
pub mod frame;
pub mod outgoing;
pub mod pool;
pub mod port;
pub mod reassembly;
pub mod session;

pub use error::Error;
pub use frame::{FrameHeader, FrameKind, Fsn};
pub use pool::BlockPool;
pub use port::{Port, StdPort, ThreadConfig};
pub use session::{OpenStatus, Session, SessionConfig, SessionInterface, Status};
