//! Receive side: MTU slices into frames, frames into application messages.
//!
//! The reassembler owns two buffers sized during the handshake: a frame
//! buffer of the peer's advertised MFS collecting slices, and an
//! application buffer of the local MAL collecting frame payloads. Both are
//! allocated when a SYNC_REQ arrives (or when our own handshake completes)
//! and survive for the life of the session.

use crate::frame::{self, FrameHeader, FrameKind, Fsn};
use crate::port::Port;
use tracing::{debug, error, trace, warn};

/// Outcome of feeding one MTU slice.
#[derive(Debug, PartialEq, Eq)]
pub enum SliceOutcome {
    /// Absorbed (or silently ignored); no frame completed yet.
    Pending,
    /// The frame was rejected; ask the peer to resend from `expected`.
    Reject { expected: Fsn },
    /// A full frame passed its FSN and CRC checks.
    Frame(CompletedFrame),
}

/// A validated frame still sitting in the frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedFrame {
    pub kind: FrameKind,
    pub payload_len: u16,
}

/// What a committed frame produced.
#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Interior frame; the message is still accumulating.
    None,
    /// A complete application message of this length is ready in the
    /// application buffer.
    Message(usize),
    /// The message outgrew the application buffer and was discarded; the
    /// session stays alive.
    Overflow,
}

/// The frame currently being collected from slices.
#[derive(Debug, Clone, Copy)]
struct PendingFrame {
    kind: FrameKind,
    payload_len: u16,
    frame_len: usize,
}

pub struct Reassembler {
    rcv_next: Fsn,
    frame_buf: Vec<u8>,
    pending: Option<PendingFrame>,
    frame_offset: usize,
    app_buf: Vec<u8>,
    app_offset: usize,
    mal: usize,
}

impl Reassembler {
    /// Buffers stay empty until the handshake arms them.
    pub fn new(mal: usize) -> Reassembler {
        Reassembler {
            rcv_next: Fsn(0),
            frame_buf: Vec::new(),
            pending: None,
            frame_offset: 0,
            app_buf: Vec::new(),
            app_offset: 0,
            mal,
        }
    }

    pub fn is_armed(&self) -> bool {
        !self.frame_buf.is_empty()
    }

    /// (Re)allocates the receive buffers and resets all assembly state.
    /// `peer_mfs` bounds the frame buffer: a frame claiming more than the
    /// peer ever advertised is rejected before it can overrun anything.
    pub fn arm(&mut self, peer_mfs: usize, rcv_next: Fsn) {
        self.frame_buf = vec![0; peer_mfs];
        self.app_buf = vec![0; self.mal];
        self.pending = None;
        self.frame_offset = 0;
        self.app_offset = 0;
        self.rcv_next = rcv_next;
        debug!(peer_mfs, rcv_next = %rcv_next, "receive buffers armed");
    }

    pub fn rcv_next(&self) -> Fsn {
        self.rcv_next
    }

    pub fn advance_rcv_next(&mut self) {
        self.rcv_next = self.rcv_next.wrapping_add(1);
    }

    /// Feeds one MTU slice.
    ///
    /// A slice opens a new frame only when nothing is being collected and
    /// it starts with the magic head, a DATA ctrl, and the expected FSN;
    /// anything else out of frame context is dropped (interior slices of a
    /// frame we already gave up on look like noise, and the next frame
    /// start will trigger the NACK that resynchronizes the peer).
    pub fn push_slice(&mut self, slice: &[u8], port: &dyn Port) -> SliceOutcome {
        let pending = match self.pending {
            Some(pending) => pending,
            None => {
                if slice.len() < frame::OVERHEAD {
                    trace!(len = slice.len(), "short slice outside a frame; dropped");
                    return SliceOutcome::Pending;
                }
                let Some(header) = FrameHeader::parse(slice) else {
                    trace!("unframed slice dropped");
                    return SliceOutcome::Pending;
                };
                if !header.kind.is_data() {
                    trace!(kind = ?header.kind, "non-data frame on the data path; dropped");
                    return SliceOutcome::Pending;
                }
                if header.fsn != self.rcv_next {
                    debug!(fsn = %header.fsn, expected = %self.rcv_next, "frame out of order");
                    return SliceOutcome::Reject { expected: self.rcv_next };
                }
                let frame_len = header.frame_len();
                if frame_len > self.frame_buf.len() {
                    warn!(frame_len, mfs = self.frame_buf.len(), "frame exceeds negotiated mfs");
                    return SliceOutcome::Reject { expected: self.rcv_next };
                }
                let pending = PendingFrame {
                    kind: header.kind,
                    payload_len: header.payload_len,
                    frame_len,
                };
                self.pending = Some(pending);
                self.frame_offset = 0;
                pending
            }
        };

        if self.frame_offset + slice.len() > self.frame_buf.len() {
            warn!(
                offset = self.frame_offset,
                slice = slice.len(),
                "slice overruns the frame buffer; frame dropped"
            );
            self.pending = None;
            self.frame_offset = 0;
            return SliceOutcome::Reject { expected: self.rcv_next };
        }
        self.frame_buf[self.frame_offset..self.frame_offset + slice.len()].copy_from_slice(slice);
        self.frame_offset += slice.len();

        if self.frame_offset < pending.frame_len {
            return SliceOutcome::Pending;
        }

        self.pending = None;
        self.frame_offset = 0;
        if !frame::verify(&self.frame_buf[..pending.frame_len], port) {
            error!(frame_len = pending.frame_len, "frame crc mismatch");
            return SliceOutcome::Reject { expected: self.rcv_next };
        }
        SliceOutcome::Frame(CompletedFrame {
            kind: pending.kind,
            payload_len: pending.payload_len,
        })
    }

    /// Appends a validated frame's payload to the application buffer.
    /// Overflow discards the in-progress message but not the session; the
    /// frame was already acknowledged and `rcv_next` advanced.
    pub fn commit_frame(&mut self, completed: &CompletedFrame) -> Delivery {
        let payload_len = completed.payload_len as usize;
        if self.app_offset + payload_len > self.app_buf.len() {
            error!(
                have = self.app_offset,
                incoming = payload_len,
                mal = self.app_buf.len(),
                "application message overflow; message discarded"
            );
            self.app_offset = 0;
            return Delivery::Overflow;
        }

        let start = frame::HEADER_LEN;
        self.app_buf[self.app_offset..self.app_offset + payload_len]
            .copy_from_slice(&self.frame_buf[start..start + payload_len]);
        self.app_offset += payload_len;

        if completed.kind.ends_message() {
            let len = self.app_offset;
            self.app_offset = 0;
            Delivery::Message(len)
        } else {
            Delivery::None
        }
    }

    /// The message produced by the last [`Delivery::Message`].
    pub fn message(&self, len: usize) -> &[u8] {
        &self.app_buf[..len]
    }
}
