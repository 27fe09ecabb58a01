//! Single/multi-frame handling on top of raw frames
//!
//! The first payload byte of every frame is the protocol control information
//! (PCI). Its high nibble selects the frame type:
//!
//! | nibble | frame             | layout                                  |
//! |--------|-------------------|-----------------------------------------|
//! | 0x0    | single frame      | `[0x0L, sdu (L bytes)]`                 |
//! | 0x1    | first frame       | `[0x1H, LL, first 6 sdu bytes]`         |
//! | 0x2    | consecutive frame | `[0x2N, next 7 sdu bytes]`              |
//! | 0x3    | flow control      | ignored, we never wait for one          |
//!
//! All length fields are checked against what actually arrived before any
//! slicing happens; frames come straight off the bus.

use thiserror::Error;
use tracing::debug;

use crate::frame::{Frame, FrameError, FrameId, MAX_FRAME_LEN};

const SINGLE_FRAME: u8 = 0x0;
const FIRST_FRAME: u8 = 0x1;
const CONSECUTIVE_FRAME: u8 = 0x2;
const FLOW_CONTROL: u8 = 0x3;

/// Largest SDU a first frame can announce (12-bit length)
pub const MAX_SDU_LEN: usize = 0x0FFF;

const SINGLE_FRAME_MAX: usize = MAX_FRAME_LEN - 1;
const FIRST_FRAME_DATA: usize = MAX_FRAME_LEN - 2;
const CONSECUTIVE_FRAME_DATA: usize = MAX_FRAME_LEN - 1;

/// A complete service data unit: SID followed by its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sdu {
    pub id: FrameId,
    pub data: Vec<u8>,
}

impl Sdu {
    /// Service identifier (first byte)
    pub fn sid(&self) -> u8 {
        self.data[0]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    Complete(Sdu),
    /// More consecutive frames are needed
    Incomplete,
    /// Frame carries no service data (flow control)
    Ignored,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("Empty frame")]
    EmptyFrame,

    #[error("Declared length {declared} but only {available} bytes present")]
    LengthMismatch {
        declared: usize,
        available: usize,
        sid: Option<u8>,
    },

    #[error("First frame announces {declared} bytes, which fits a single frame")]
    InvalidFirstFrameLength { declared: usize, sid: Option<u8> },

    #[error("Consecutive frame without a first frame")]
    UnexpectedConsecutive,

    #[error("Wrong consecutive frame index: expected {expected}, got {received}")]
    SequenceMismatch {
        expected: u8,
        received: u8,
        sid: Option<u8>,
    },

    #[error("Unknown PCI 0x{0:02X}")]
    InvalidPci(u8),
}

impl ReassemblyError {
    /// SID of the rejected request, when it is known
    pub fn sid(&self) -> Option<u8> {
        match self {
            Self::LengthMismatch { sid, .. }
            | Self::InvalidFirstFrameLength { sid, .. }
            | Self::SequenceMismatch { sid, .. } => *sid,
            _ => None,
        }
    }
}

struct Pending {
    raw_id: u32,
    expected_len: usize,
    next_sn: u8,
    buffer: Vec<u8>,
}

/// Reassembles multi-frame requests.
///
/// Only one segmented message is tracked at a time. A frame with a different
/// identifier drops the partial message; a new first frame on the same
/// identifier restarts it.
#[derive(Default)]
pub struct Reassembler {
    pending: Option<Pending>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a segmented message is in progress
    pub fn in_progress(&self) -> bool {
        self.pending.is_some()
    }

    pub fn push(&mut self, frame: &Frame) -> Result<Reassembly, ReassemblyError> {
        if let Some(pending) = &self.pending {
            if pending.raw_id != frame.raw_id() {
                debug!(
                    pending_id = format!("0x{:08X}", pending.raw_id),
                    can_id = format!("0x{:08X}", frame.raw_id()),
                    "Segmented message interrupted, discarding partial data"
                );
                self.pending = None;
            }
        }

        let data = frame.data();
        let pci = *data.first().ok_or(ReassemblyError::EmptyFrame)?;

        match pci >> 4 {
            SINGLE_FRAME => {
                self.pending = None;
                let declared = (pci & 0x0F) as usize;
                let available = data.len() - 1;
                if declared == 0 || declared > available {
                    return Err(ReassemblyError::LengthMismatch {
                        declared,
                        available,
                        sid: data.get(1).copied(),
                    });
                }
                Ok(Reassembly::Complete(Sdu {
                    id: frame.id(),
                    data: data[1..=declared].to_vec(),
                }))
            }
            FIRST_FRAME => {
                self.pending = None;
                let low = *data.get(1).ok_or(ReassemblyError::LengthMismatch {
                    declared: 0,
                    available: 0,
                    sid: None,
                })?;
                let declared = (((pci & 0x0F) as usize) << 8) | low as usize;
                if declared <= SINGLE_FRAME_MAX {
                    return Err(ReassemblyError::InvalidFirstFrameLength {
                        declared,
                        sid: data.get(2).copied(),
                    });
                }

                let first = &data[2..];
                let take = first.len().min(declared);
                let mut buffer = Vec::with_capacity(declared);
                buffer.extend_from_slice(&first[..take]);

                self.pending = Some(Pending {
                    raw_id: frame.raw_id(),
                    expected_len: declared,
                    next_sn: 1,
                    buffer,
                });
                Ok(Reassembly::Incomplete)
            }
            CONSECUTIVE_FRAME => {
                let mut pending = self
                    .pending
                    .take()
                    .ok_or(ReassemblyError::UnexpectedConsecutive)?;

                let sn = pci & 0x0F;
                if sn != pending.next_sn {
                    return Err(ReassemblyError::SequenceMismatch {
                        expected: pending.next_sn,
                        received: sn,
                        sid: pending.buffer.first().copied(),
                    });
                }

                let remaining = pending.expected_len - pending.buffer.len();
                let chunk = &data[1..];
                pending
                    .buffer
                    .extend_from_slice(&chunk[..chunk.len().min(remaining)]);
                pending.next_sn = (pending.next_sn + 1) & 0x0F;

                if pending.buffer.len() == pending.expected_len {
                    Ok(Reassembly::Complete(Sdu {
                        id: FrameId::from_raw(pending.raw_id),
                        data: pending.buffer,
                    }))
                } else {
                    self.pending = Some(pending);
                    Ok(Reassembly::Incomplete)
                }
            }
            FLOW_CONTROL => Ok(Reassembly::Ignored),
            _ => Err(ReassemblyError::InvalidPci(pci)),
        }
    }
}

/// Split an SDU into frames carrying PCI bytes.
///
/// Consecutive frames are emitted back to back; the receiver's flow control
/// is not awaited.
pub fn segment(id: FrameId, sdu: &[u8]) -> Result<Vec<Frame>, FrameError> {
    let raw_id = id.to_raw();

    if sdu.len() <= SINGLE_FRAME_MAX {
        let mut payload = Vec::with_capacity(sdu.len() + 1);
        payload.push(sdu.len() as u8);
        payload.extend_from_slice(sdu);
        return Ok(vec![Frame::new(raw_id, &payload)?]);
    }

    if sdu.len() > MAX_SDU_LEN {
        return Err(FrameError::SduTooLong(sdu.len()));
    }

    let mut frames = Vec::with_capacity(1 + sdu.len() / CONSECUTIVE_FRAME_DATA);
    let (first, rest) = sdu.split_at(FIRST_FRAME_DATA);

    let mut payload = vec![
        (FIRST_FRAME << 4) | ((sdu.len() >> 8) as u8 & 0x0F),
        (sdu.len() & 0xFF) as u8,
    ];
    payload.extend_from_slice(first);
    frames.push(Frame::new(raw_id, &payload)?);

    let mut sn: u8 = 1;
    for chunk in rest.chunks(CONSECUTIVE_FRAME_DATA) {
        let mut payload = Vec::with_capacity(chunk.len() + 1);
        payload.push((CONSECUTIVE_FRAME << 4) | sn);
        payload.extend_from_slice(chunk);
        frames.push(Frame::new(raw_id, &payload)?);
        sn = (sn + 1) & 0x0F;
    }

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: u32 = 0x10FA;

    fn frame(id: u32, data: &[u8]) -> Frame {
        Frame::new(id, data).unwrap()
    }

    #[test]
    fn test_single_frame() {
        let mut rx = Reassembler::new();
        let result = rx.push(&frame(ID, &[0x02, 0x3E, 0x00])).unwrap();
        match result {
            Reassembly::Complete(sdu) => {
                assert_eq!(sdu.sid(), 0x3E);
                assert_eq!(sdu.data, vec![0x3E, 0x00]);
                assert_eq!(sdu.id.sender, 0xFA);
            }
            other => panic!("Expected complete SDU, got {:?}", other),
        }
    }

    #[test]
    fn test_single_frame_ignores_padding() {
        let mut rx = Reassembler::new();
        let result = rx
            .push(&frame(ID, &[0x02, 0x3E, 0x00, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC]))
            .unwrap();
        assert!(matches!(result, Reassembly::Complete(sdu) if sdu.data == vec![0x3E, 0x00]));
    }

    #[test]
    fn test_single_frame_length_overrun() {
        let mut rx = Reassembler::new();
        let err = rx.push(&frame(ID, &[0x05, 0x27, 0x01])).unwrap_err();
        assert_eq!(
            err,
            ReassemblyError::LengthMismatch {
                declared: 5,
                available: 2,
                sid: Some(0x27),
            }
        );
        assert_eq!(err.sid(), Some(0x27));
    }

    #[test]
    fn test_empty_frame_rejected() {
        let mut rx = Reassembler::new();
        assert_eq!(
            rx.push(&frame(ID, &[])).unwrap_err(),
            ReassemblyError::EmptyFrame
        );
    }

    #[test]
    fn test_multi_frame() {
        let mut rx = Reassembler::new();
        assert_eq!(
            rx.push(&frame(ID, &[0x10, 0x0A, 0x36, 0x01, 1, 2, 3, 4]))
                .unwrap(),
            Reassembly::Incomplete
        );
        assert!(rx.in_progress());

        match rx.push(&frame(ID, &[0x21, 5, 6, 7, 8])).unwrap() {
            Reassembly::Complete(sdu) => {
                assert_eq!(sdu.data, vec![0x36, 0x01, 1, 2, 3, 4, 5, 6, 7, 8]);
            }
            other => panic!("Expected complete SDU, got {:?}", other),
        }
        assert!(!rx.in_progress());
    }

    #[test]
    fn test_interrupting_identifier_discards_partial() {
        let mut rx = Reassembler::new();
        rx.push(&frame(ID, &[0x10, 0x0A, 0x36, 0x01, 1, 2, 3, 4]))
            .unwrap();

        // A single frame from another sender is served normally
        let other = rx.push(&frame(0x10FB, &[0x02, 0x3E, 0x00])).unwrap();
        assert!(matches!(other, Reassembly::Complete(_)));

        // The consecutive frame of the interrupted message has nothing to join
        assert_eq!(
            rx.push(&frame(ID, &[0x21, 5, 6, 7, 8])).unwrap_err(),
            ReassemblyError::UnexpectedConsecutive
        );
    }

    #[test]
    fn test_wrong_consecutive_index() {
        let mut rx = Reassembler::new();
        rx.push(&frame(ID, &[0x10, 0x0A, 0x36, 0x01, 1, 2, 3, 4]))
            .unwrap();
        assert_eq!(
            rx.push(&frame(ID, &[0x23, 5, 6, 7, 8])).unwrap_err(),
            ReassemblyError::SequenceMismatch {
                expected: 1,
                received: 3,
                sid: Some(0x36),
            }
        );
        assert!(!rx.in_progress());
    }

    #[test]
    fn test_first_frame_too_short() {
        let mut rx = Reassembler::new();
        assert_eq!(
            rx.push(&frame(ID, &[0x10, 0x05, 0x36, 0x01, 1, 2, 3]))
                .unwrap_err(),
            ReassemblyError::InvalidFirstFrameLength {
                declared: 5,
                sid: Some(0x36),
            }
        );
        assert!(matches!(
            rx.push(&frame(ID, &[0x10])).unwrap_err(),
            ReassemblyError::LengthMismatch { .. }
        ));
    }

    #[test]
    fn test_flow_control_ignored() {
        let mut rx = Reassembler::new();
        assert_eq!(
            rx.push(&frame(ID, &[0x30, 0x00, 0x00])).unwrap(),
            Reassembly::Ignored
        );
    }

    #[test]
    fn test_segment_short_response() {
        let frames = segment(FrameId::from_raw(0xFA10), &[0x7E, 0x00]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data(), &[0x02, 0x7E, 0x00]);
        assert_eq!(frames[0].raw_id(), 0xFA10);
    }

    #[test]
    fn test_segment_long_response_reassembles() {
        let sdu: Vec<u8> = (0..20).collect();
        let frames = segment(FrameId::from_raw(0xFA10), &sdu).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].data()[..2], [0x10, 20]);
        assert_eq!(frames[1].data()[0], 0x21);
        assert_eq!(frames[2].data()[0], 0x22);

        let mut rx = Reassembler::new();
        let mut result = Reassembly::Incomplete;
        for frame in &frames {
            result = rx.push(frame).unwrap();
        }
        assert!(matches!(result, Reassembly::Complete(out) if out.data == sdu));
    }

    #[test]
    fn test_segment_rejects_oversized() {
        let sdu = vec![0u8; MAX_SDU_LEN + 1];
        assert_eq!(
            segment(FrameId::from_raw(0xFA10), &sdu),
            Err(FrameError::SduTooLong(MAX_SDU_LEN + 1))
        );
    }
}
