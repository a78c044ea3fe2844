//! Send side: message segmentation and the in-flight retransmission list.
//!
//! `segment` runs on the producer thread and only touches the pools; FSN
//! assignment, CRC sealing, and emission happen later on the worker so the
//! sequence numbers reflect true transmission order even with competing
//! senders. Once emitted, a frame parks in the in-flight list with its
//! exact wire bytes until the peer's cumulative ACK releases it or a NACK
//! asks for it again.

use crate::error::{Error, Result};
use crate::event::SendBatch;
use crate::frame::{self, FrameHeader, FrameKind, Fsn};
use crate::pool::{Block, BlockPool};
use std::collections::VecDeque;

/// A frame that has been emitted and awaits cumulative acknowledgement.
#[derive(Debug)]
pub struct InFlightFrame {
    pub fsn: Fsn,
    /// The serialized frame, ready to re-emit unchanged.
    pub block: Block,
}

/// Worker-side send state: the FSN counter and the in-flight list, ordered
/// by FSN (insertion order equals transmission order).
#[derive(Debug, Default)]
pub struct Outgoing {
    snd_next: Fsn,
    in_flight: VecDeque<InFlightFrame>,
}

impl Outgoing {
    pub fn new() -> Outgoing {
        Outgoing::default()
    }

    pub fn snd_next(&self) -> Fsn {
        self.snd_next
    }

    /// Consumes one sequence number.
    pub fn next_fsn(&mut self) -> Fsn {
        self.snd_next.bump()
    }

    pub fn push_in_flight(&mut self, fsn: Fsn, block: Block) {
        self.in_flight.push_back(InFlightFrame { fsn, block });
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn iter_in_flight(&self) -> impl Iterator<Item = &InFlightFrame> {
        self.in_flight.iter()
    }

    /// Cumulative ACK: releases the leading run of frames at or before
    /// `fsn`, stopping at the first unacknowledged one. Returns how many
    /// frames were released.
    pub fn handle_ack(&mut self, fsn: Fsn) -> usize {
        let mut released = 0;
        while let Some(front) = self.in_flight.front() {
            if fsn.at_or_after(front.fsn) {
                self.in_flight.pop_front();
                released += 1;
            } else {
                break;
            }
        }
        released
    }

    /// NACK: frames older than `fsn` are implicitly acknowledged and
    /// released; the requested frame and everything newer stay queued for
    /// re-emission. Returns how many frames were released.
    pub fn handle_nack(&mut self, fsn: Fsn) -> usize {
        let before = self.in_flight.len();
        self.in_flight.retain(|f| f.fsn.at_or_after(fsn));
        before - self.in_flight.len()
    }

    /// Drops the whole list (handshake completion). Returns how many frames
    /// were released.
    pub fn clear_in_flight(&mut self) -> usize {
        let released = self.in_flight.len();
        self.in_flight.clear();
        released
    }
}

/// Splits an application message into pooled data frames.
///
/// A message that fits one frame becomes COMPLETE; otherwise the first
/// frame is START, the last END, and the interior MIDDLE. On any pool
/// exhaustion everything acquired so far goes back and the send fails.
pub fn segment(
    data: &[u8],
    mfs: usize,
    frame_pool: &BlockPool,
    permit_pool: &BlockPool,
) -> Result<SendBatch> {
    let max_payload = mfs - frame::OVERHEAD;
    let count = data.len().div_ceil(max_payload);

    let permit = permit_pool.acquire().ok_or(Error::PoolExhausted)?;
    let mut frames = Vec::with_capacity(count);
    for (index, chunk) in data.chunks(max_payload).enumerate() {
        let mut block = frame_pool.acquire().ok_or(Error::PoolExhausted)?;
        let kind = if count == 1 {
            FrameKind::DataComplete
        } else if index == 0 {
            FrameKind::DataStart
        } else if index == count - 1 {
            FrameKind::DataEnd
        } else {
            FrameKind::DataMiddle
        };
        pack_data_frame(&mut block, kind, chunk);
        frames.push(block);
    }

    Ok(SendBatch { permit, frames })
}

/// Packs header and payload; FSN and CRC are stamped at emission time.
fn pack_data_frame(block: &mut Block, kind: FrameKind, payload: &[u8]) {
    let frame_len = payload.len() + frame::OVERHEAD;
    let buf = block.bytes_mut();
    FrameHeader { kind, fsn: Fsn(0), payload_len: payload.len() as u16 }.write(buf);
    buf[frame::HEADER_LEN..frame::HEADER_LEN + payload.len()].copy_from_slice(payload);
    block.set_len(frame_len);
}
