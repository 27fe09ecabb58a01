//! TransferData (0x36) chunked firmware transfer
//!
//! A transfer starts with the first TransferData after RequestDownload put the
//! OTA state in `WaitDownloadCompleted`. That first request also fixes where
//! the image comes from:
//!
//! - **Inline**: the request carries the relayed image as its parameter
//!   record. Every later request carries the same record and each one writes
//!   the next chunk of it.
//! - **Staged**: the request has no record. The image for the frame's target
//!   unit is read from the staging directory once and sliced from memory.
//!
//! The live transfer session sits behind one mutex so checks, writes and
//! state changes for a block happen as a unit.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    negative_response, positive_response, service_id, NegativeResponseCode,
    RequestDownloadService,
};
use crate::config::TransferConfig;
use crate::did::{DidStore, OtaTransferState};
use crate::frame::FrameId;
use crate::memory::MemoryStore;

/// Where the bytes of a transfer come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSource {
    Inline,
    Staged,
}

impl fmt::Display for TransferSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of a retired transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub source: TransferSource,
    pub chunk_size: usize,
    pub total_size: usize,
    pub bytes_sent: usize,
    pub blocks: usize,
    /// XOR checksum per written chunk (staged transfers only)
    pub checksums: Vec<u8>,
    /// `ProcessingTransferComplete` or `ProcessingTransferFailed`
    pub outcome: OtaTransferState,
}

struct TransferSession {
    source: TransferSource,
    /// Staged image; empty for inline transfers
    image: Vec<u8>,
    chunk_size: usize,
    total_size: usize,
    bytes_sent: usize,
    blocks: usize,
    checksums: Vec<u8>,
}

impl TransferSession {
    fn remaining(&self) -> usize {
        self.total_size - self.bytes_sent
    }

    fn into_summary(self, outcome: OtaTransferState) -> TransferSummary {
        TransferSummary {
            source: self.source,
            chunk_size: self.chunk_size,
            total_size: self.total_size,
            bytes_sent: self.bytes_sent,
            blocks: self.blocks,
            checksums: self.checksums,
            outcome,
        }
    }
}

/// Block sequence counter after `current`: 1, 2, ..., 255, 1, ...
pub fn next_sequence(current: u8) -> u8 {
    match current {
        0xFF => 0x01,
        n => n + 1,
    }
}

/// Accumulated XOR of all bytes in a chunk
pub fn xor_checksum(chunk: &[u8]) -> u8 {
    chunk.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Live session plus the block counter, which outlives the session so a
/// replayed block is still caught once the transfer has retired
struct TransferTracker {
    session: Option<TransferSession>,
    expected_sequence: u8,
}

impl Default for TransferTracker {
    fn default() -> Self {
        Self {
            session: None,
            expected_sequence: 1,
        }
    }
}

pub struct TransferDataService {
    staging: TransferConfig,
    download: Arc<RequestDownloadService>,
    dids: Arc<DidStore>,
    memory: Arc<MemoryStore>,
    live: Mutex<TransferTracker>,
    last: Mutex<Option<TransferSummary>>,
}

impl TransferDataService {
    pub fn new(
        staging: TransferConfig,
        download: Arc<RequestDownloadService>,
        dids: Arc<DidStore>,
        memory: Arc<MemoryStore>,
    ) -> Self {
        Self {
            staging,
            download,
            dids,
            memory,
            live: Mutex::new(TransferTracker::default()),
            last: Mutex::new(None),
        }
    }

    /// Whether a transfer session is live
    pub fn is_active(&self) -> bool {
        self.live.lock().session.is_some()
    }

    /// Counter the next TransferData must carry
    pub fn expected_sequence(&self) -> u8 {
        self.live.lock().expected_sequence
    }

    /// Bytes written by the live transfer
    pub fn bytes_sent(&self) -> Option<usize> {
        self.live.lock().session.as_ref().map(|s| s.bytes_sent)
    }

    /// Summary of the most recently retired transfer
    pub fn last_summary(&self) -> Option<TransferSummary> {
        self.last.lock().clone()
    }

    /// Handle a TransferData request SDU received on `id`
    pub fn handle(&self, id: FrameId, request: &[u8]) -> Vec<u8> {
        if request.len() < 2 {
            debug!(len = request.len(), "TransferData: request too short");
            return negative_response(
                service_id::TRANSFER_DATA,
                NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat,
            );
        }

        let block_counter = request[1];
        let record = &request[2..];

        let mut live = self.live.lock();
        let starting = self.dids.ota_state() == OtaTransferState::WaitDownloadCompleted;

        let expected = if starting { 1 } else { live.expected_sequence };
        if block_counter != expected {
            debug!(
                expected,
                received = block_counter,
                "TransferData: wrong block sequence counter"
            );
            return negative_response(
                service_id::TRANSFER_DATA,
                NegativeResponseCode::WrongBlockSequenceCounter,
            );
        }

        if starting {
            if let Err(nrc) = self.start(&mut live, id, record) {
                return negative_response(service_id::TRANSFER_DATA, nrc);
            }
        }

        let Some(session) = live.session.as_mut() else {
            debug!(state = %self.dids.ota_state(), "TransferData: no transfer in progress");
            return negative_response(
                service_id::TRANSFER_DATA,
                NegativeResponseCode::ConditionsNotCorrect,
            );
        };
        if self.dids.ota_state() != OtaTransferState::Processing {
            debug!(state = %self.dids.ota_state(), "TransferData: not processing");
            return negative_response(
                service_id::TRANSFER_DATA,
                NegativeResponseCode::ConditionsNotCorrect,
            );
        }

        match (session.source, record.is_empty()) {
            (TransferSource::Inline, true) | (TransferSource::Staged, false) => {
                debug!(
                    source = %session.source,
                    record_len = record.len(),
                    "TransferData: request does not match transfer source"
                );
                return negative_response(
                    service_id::TRANSFER_DATA,
                    NegativeResponseCode::ConditionsNotCorrect,
                );
            }
            (TransferSource::Inline, false) if record.len() != session.total_size => {
                debug!(
                    record_len = record.len(),
                    total = session.total_size,
                    "TransferData: inline record changed length"
                );
                return negative_response(
                    service_id::TRANSFER_DATA,
                    NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat,
                );
            }
            _ => {}
        }

        let start = session.bytes_sent;
        let end = start + session.chunk_size.min(session.remaining());
        let chunk = match session.source {
            TransferSource::Inline => &record[start..end],
            TransferSource::Staged => &session.image[start..end],
        };

        if let Err(e) = self.memory.write_to_address(chunk) {
            warn!(
                block = block_counter,
                error = %e,
                "TransferData: write failed, transfer suspended"
            );
            self.retire(&mut live, OtaTransferState::ProcessingTransferFailed);
            return negative_response(
                service_id::TRANSFER_DATA,
                NegativeResponseCode::TransferDataSuspended,
            );
        }

        let mut response_data = vec![block_counter];
        match session.source {
            TransferSource::Inline => response_data.extend_from_slice(chunk),
            TransferSource::Staged => session.checksums.push(xor_checksum(chunk)),
        }
        session.bytes_sent = end;
        session.blocks += 1;
        let finished = session.remaining() == 0;

        info!(
            block = block_counter,
            bytes = end - start,
            total_sent = session.bytes_sent,
            total_expected = session.total_size,
            "TransferData: block written"
        );

        live.expected_sequence = next_sequence(block_counter);
        if finished {
            self.retire(&mut live, OtaTransferState::ProcessingTransferComplete);
        }

        positive_response(service_id::TRANSFER_DATA, &response_data)
    }

    /// Open a session for the first block after RequestDownload
    fn start(
        &self,
        live: &mut TransferTracker,
        id: FrameId,
        record: &[u8],
    ) -> Result<(), NegativeResponseCode> {
        if let Err(state) = self.dids.transition_ota(
            |state| state == OtaTransferState::WaitDownloadCompleted,
            OtaTransferState::Processing,
        ) {
            debug!(state = %state, "TransferData: download no longer pending");
            return Err(NegativeResponseCode::ConditionsNotCorrect);
        }
        // A stale session cannot survive a new download
        live.session = None;
        live.expected_sequence = 1;

        let (source, image) = if record.is_empty() {
            let path = self.staging.staged_image_path(id.target);
            match MemoryStore::read_binary(&path) {
                Ok(image) if !image.is_empty() => (TransferSource::Staged, image),
                Ok(_) => {
                    warn!(path = %path.display(), "TransferData: staged image is empty");
                    self.fail_start();
                    return Err(NegativeResponseCode::TransferDataSuspended);
                }
                Err(e) => {
                    warn!(error = %e, "TransferData: staged image unavailable");
                    self.fail_start();
                    return Err(NegativeResponseCode::TransferDataSuspended);
                }
            }
        } else {
            (TransferSource::Inline, Vec::new())
        };

        let total_size = match source {
            TransferSource::Inline => record.len(),
            TransferSource::Staged => image.len(),
        };

        if let Some(download) = self.download.current_request() {
            if total_size as u64 > download.size {
                warn!(
                    total_size,
                    announced = download.size,
                    "TransferData: image larger than announced download"
                );
                self.fail_start();
                return Err(NegativeResponseCode::UploadDownloadNotAccepted);
            }
        }

        let chunk_size = usize::from(self.download.max_block_size()).max(1);
        info!(
            target = format!("0x{:02X}", id.target),
            source = %source,
            chunk_size,
            total_size,
            expected_requests = total_size.div_ceil(chunk_size),
            "TransferData: transfer started"
        );

        live.session = Some(TransferSession {
            source,
            image,
            chunk_size,
            total_size,
            bytes_sent: 0,
            blocks: 0,
            checksums: Vec::new(),
        });
        Ok(())
    }

    fn fail_start(&self) {
        self.dids
            .set_ota_state(OtaTransferState::ProcessingTransferFailed);
    }

    fn retire(&self, live: &mut TransferTracker, outcome: OtaTransferState) {
        self.dids.set_ota_state(outcome);
        if let Some(session) = live.session.take() {
            let summary = session.into_summary(outcome);
            info!(
                outcome = %outcome,
                bytes_sent = summary.bytes_sent,
                blocks = summary.blocks,
                checksums = %hex::encode(&summary.checksums),
                "TransferData: transfer retired"
            );
            *self.last.lock() = Some(summary);
        }
    }
}
