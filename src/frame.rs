//! Wire frame codec.
//!
//! Every frame shares one fixed layout, little-endian throughout:
//!
//! ```text
//! offset 0..2   magic        0xBFCD, emitted as {0xCD, 0xBF}
//! offset 2      ctrl         frame kind
//! offset 3      fsn          frame sequence number
//! offset 4..6   payload_len
//! offset 6..    payload
//! last 2 bytes  crc16        over everything before it
//! ```
//!
//! The codec is pure byte manipulation; the CRC function itself is a
//! platform capability (see [`crate::port::Port::crc16`]).

use crate::port::Port;
use std::fmt;

/// Magic head of every frame.
pub const MAGIC: u16 = 0xBFCD;

/// Fixed header: magic + ctrl + fsn + payload_len.
pub const HEADER_LEN: usize = 6;
/// Trailing CRC.
pub const TRAILER_LEN: usize = 2;
/// Header plus trailer; a frame of payload `n` occupies `n + OVERHEAD` bytes.
pub const OVERHEAD: usize = HEADER_LEN + TRAILER_LEN;

/// ACK and NACK frames carry a single FSN byte of payload.
pub const CONTROL_FRAME_LEN: usize = OVERHEAD + 1;
/// SYNC_REQ carries the sender's MFS as a `u16`.
pub const SYNC_REQ_FRAME_LEN: usize = OVERHEAD + 2;
/// SYNC_ACK has an empty payload.
pub const SYNC_ACK_FRAME_LEN: usize = OVERHEAD;

/// Frame sequence number: a one-byte counter compared with wrapping signed
/// arithmetic, so ordering survives the `0xFF -> 0x00` wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fsn(pub u8);

impl Fsn {
    /// Signed distance from `earlier` to `self`; `diff(0x00, 0xFF) == 1`.
    pub fn diff(self, earlier: Fsn) -> i8 {
        self.0.wrapping_sub(earlier.0) as i8
    }

    /// Cumulative-acknowledgement test: `self` covers `other`.
    pub fn at_or_after(self, other: Fsn) -> bool {
        self.diff(other) >= 0
    }

    pub fn wrapping_add(self, val: u8) -> Fsn {
        Fsn(self.0.wrapping_add(val))
    }

    /// Returns the current value and advances by one.
    pub fn bump(&mut self) -> Fsn {
        let cur = *self;
        self.0 = self.0.wrapping_add(1);
        cur
    }
}

impl fmt::Display for Fsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The ctrl byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// A whole application message in one frame.
    DataComplete = 0x10,
    /// First frame of a multi-frame message.
    DataStart = 0x11,
    /// Interior frame.
    DataMiddle = 0x12,
    /// Last frame of a multi-frame message.
    DataEnd = 0x13,
    /// Cumulative acknowledgement; payload is the acknowledged FSN.
    Ack = 0x14,
    /// Negative acknowledgement; payload is the expected FSN.
    Nack = 0x15,
    /// Handshake request; payload is the sender's MFS.
    SyncReq = 0x18,
    /// Handshake acknowledgement; fsn echoes the request.
    SyncAck = 0x1C,
}

impl FrameKind {
    pub fn from_ctrl(ctrl: u8) -> Option<FrameKind> {
        match ctrl {
            0x10 => Some(FrameKind::DataComplete),
            0x11 => Some(FrameKind::DataStart),
            0x12 => Some(FrameKind::DataMiddle),
            0x13 => Some(FrameKind::DataEnd),
            0x14 => Some(FrameKind::Ack),
            0x15 => Some(FrameKind::Nack),
            0x18 => Some(FrameKind::SyncReq),
            0x1C => Some(FrameKind::SyncAck),
            _ => None,
        }
    }

    /// One of the four DATA kinds.
    pub fn is_data(self) -> bool {
        matches!(
            self,
            FrameKind::DataComplete
                | FrameKind::DataStart
                | FrameKind::DataMiddle
                | FrameKind::DataEnd
        )
    }

    /// The frame that completes an application message.
    pub fn ends_message(self) -> bool {
        matches!(self, FrameKind::DataComplete | FrameKind::DataEnd)
    }
}

/// Decoded fixed header of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub fsn: Fsn,
    pub payload_len: u16,
}

impl FrameHeader {
    /// Parses the fixed header, rejecting a bad magic or unknown ctrl.
    pub fn parse(buf: &[u8]) -> Option<FrameHeader> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        if u16::from_le_bytes([buf[0], buf[1]]) != MAGIC {
            return None;
        }
        let kind = FrameKind::from_ctrl(buf[2])?;
        Some(FrameHeader {
            kind,
            fsn: Fsn(buf[3]),
            payload_len: u16::from_le_bytes([buf[4], buf[5]]),
        })
    }

    pub fn write(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&MAGIC.to_le_bytes());
        buf[2] = self.kind as u8;
        buf[3] = self.fsn.0;
        buf[4..6].copy_from_slice(&self.payload_len.to_le_bytes());
    }

    /// Full on-wire length of the frame this header describes.
    pub fn frame_len(&self) -> usize {
        self.payload_len as usize + OVERHEAD
    }
}

/// Overwrites the FSN byte of an already-packed frame.
pub fn set_fsn(frame: &mut [u8], fsn: Fsn) {
    frame[3] = fsn.0;
}

/// Stamps the trailing CRC over everything before it.
pub fn seal(frame: &mut [u8], port: &dyn Port) {
    let body = frame.len() - TRAILER_LEN;
    let crc = port.crc16(&frame[..body]);
    frame[body..].copy_from_slice(&crc.to_le_bytes());
}

/// Checks the trailing CRC of a fully collected frame.
pub fn verify(frame: &[u8], port: &dyn Port) -> bool {
    if frame.len() < OVERHEAD {
        return false;
    }
    let body = frame.len() - TRAILER_LEN;
    let stored = u16::from_le_bytes([frame[body], frame[body + 1]]);
    port.crc16(&frame[..body]) == stored
}

/// Builds a 9-byte ACK or NACK. `header_fsn` is the sender's current
/// `snd_next` (informational, not consumed); `ack_fsn` rides in the payload.
pub fn encode_control(
    kind: FrameKind,
    header_fsn: Fsn,
    ack_fsn: Fsn,
    port: &dyn Port,
) -> [u8; CONTROL_FRAME_LEN] {
    debug_assert!(matches!(kind, FrameKind::Ack | FrameKind::Nack));
    let mut frame = [0u8; CONTROL_FRAME_LEN];
    FrameHeader { kind, fsn: header_fsn, payload_len: 1 }.write(&mut frame);
    frame[HEADER_LEN] = ack_fsn.0;
    seal(&mut frame, port);
    frame
}

/// Builds the 10-byte SYNC_REQ advertising the local MFS.
pub fn encode_sync_req(fsn: Fsn, mfs: u16, port: &dyn Port) -> [u8; SYNC_REQ_FRAME_LEN] {
    let mut frame = [0u8; SYNC_REQ_FRAME_LEN];
    FrameHeader { kind: FrameKind::SyncReq, fsn, payload_len: 2 }.write(&mut frame);
    frame[HEADER_LEN..HEADER_LEN + 2].copy_from_slice(&mfs.to_le_bytes());
    seal(&mut frame, port);
    frame
}

/// Builds the 8-byte SYNC_ACK echoing the request's FSN.
pub fn encode_sync_ack(fsn: Fsn, port: &dyn Port) -> [u8; SYNC_ACK_FRAME_LEN] {
    let mut frame = [0u8; SYNC_ACK_FRAME_LEN];
    FrameHeader { kind: FrameKind::SyncAck, fsn, payload_len: 0 }.write(&mut frame);
    seal(&mut frame, port);
    frame
}
