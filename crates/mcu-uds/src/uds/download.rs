//! RequestDownload (0x34) and RequestTransferExit (0x37)
//!
//! RequestDownload opens a transfer: it checks session and security, points
//! the memory cursor at the announced address and publishes the block size
//! TransferData slices with. TransferExit closes a completed transfer and
//! answers with the CRC-32 of what was written.

use std::sync::Arc;

use crc::{Crc, CRC_32_ISO_HDLC};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    negative_response, positive_response, service_id, DiagnosticSession, NegativeResponseCode,
    SecurityAccessService, SessionService,
};
use crate::did::{DidStore, OtaTransferState};
use crate::memory::MemoryStore;

/// CRC-32 calculator (ISO HDLC / CRC-32)
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// lengthFormatIdentifier: max block length encoded on two bytes
const LENGTH_FORMAT_ID: u8 = 0x20;

/// Parameters of the most recent accepted RequestDownload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Region offset the image is written to
    pub address: u64,
    /// Announced image size in bytes
    pub size: u64,
    /// Chunk size TransferData slices the image with
    pub chunk_size: u16,
}

pub struct RequestDownloadService {
    max_block_size: u16,
    session: Arc<SessionService>,
    security: Arc<SecurityAccessService>,
    dids: Arc<DidStore>,
    memory: Arc<MemoryStore>,
    published: Mutex<Option<DownloadRequest>>,
}

impl RequestDownloadService {
    pub fn new(
        max_block_size: u16,
        session: Arc<SessionService>,
        security: Arc<SecurityAccessService>,
        dids: Arc<DidStore>,
        memory: Arc<MemoryStore>,
    ) -> Self {
        Self {
            max_block_size,
            session,
            security,
            dids,
            memory,
            published: Mutex::new(None),
        }
    }

    /// Chunk size published to TransferData
    pub fn max_block_size(&self) -> u16 {
        self.max_block_size
    }

    pub fn current_request(&self) -> Option<DownloadRequest> {
        *self.published.lock()
    }

    pub fn handle_request_download(&self, request: &[u8]) -> Vec<u8> {
        if request.len() < 3 {
            return negative_response(
                service_id::REQUEST_DOWNLOAD,
                NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat,
            );
        }

        let current_session = self.session.current();
        if current_session != DiagnosticSession::Programming {
            debug!(
                session = %current_session,
                "Download denied: requires programming session"
            );
            return negative_response(
                service_id::REQUEST_DOWNLOAD,
                NegativeResponseCode::ConditionsNotCorrect,
            );
        }

        if !self.security.is_unlocked() {
            debug!("Download denied: requires security access (0x27)");
            return negative_response(
                service_id::REQUEST_DOWNLOAD,
                NegativeResponseCode::SecurityAccessDenied,
            );
        }

        if self.dids.ota_state().is_active() {
            debug!("Download denied: transfer already in progress");
            return negative_response(
                service_id::REQUEST_DOWNLOAD,
                NegativeResponseCode::ConditionsNotCorrect,
            );
        }

        let _data_format = request[1];
        let addr_len_format = request[2];

        let memory_size_len = ((addr_len_format >> 4) & 0x0F) as usize;
        let memory_addr_len = (addr_len_format & 0x0F) as usize;
        if !(1..=8).contains(&memory_size_len) || !(1..=8).contains(&memory_addr_len) {
            debug!(
                format = format!("0x{:02X}", addr_len_format),
                "Download denied: unsupported addressAndLengthFormatIdentifier"
            );
            return negative_response(
                service_id::REQUEST_DOWNLOAD,
                NegativeResponseCode::RequestOutOfRange,
            );
        }

        if request.len() != 3 + memory_addr_len + memory_size_len {
            return negative_response(
                service_id::REQUEST_DOWNLOAD,
                NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat,
            );
        }

        let (address_bytes, size_bytes) = request[3..].split_at(memory_addr_len);
        let address = be_value(address_bytes);
        let size = be_value(size_bytes);

        if size == 0 || !self.memory.fits(address, size) {
            debug!(
                address = format!("0x{:08X}", address),
                size,
                region_size = self.memory.size(),
                "Download denied: outside memory region"
            );
            return negative_response(
                service_id::REQUEST_DOWNLOAD,
                NegativeResponseCode::RequestOutOfRange,
            );
        }

        if let Err(state) = self.dids.transition_ota(
            |state| !state.is_active(),
            OtaTransferState::WaitDownloadCompleted,
        ) {
            debug!(state = %state, "Download denied: transfer started concurrently");
            return negative_response(
                service_id::REQUEST_DOWNLOAD,
                NegativeResponseCode::ConditionsNotCorrect,
            );
        }

        if let Err(e) = self.memory.set_cursor(address) {
            warn!(error = %e, "Download failed: cannot position write cursor");
            self.dids.set_ota_state(OtaTransferState::ProcessingTransferFailed);
            return negative_response(
                service_id::REQUEST_DOWNLOAD,
                NegativeResponseCode::UploadDownloadNotAccepted,
            );
        }

        *self.published.lock() = Some(DownloadRequest {
            address,
            size,
            chunk_size: self.max_block_size,
        });

        info!(
            address = format!("0x{:08X}", address),
            size,
            max_block_size = self.max_block_size,
            "RequestDownload: initiating download"
        );

        positive_response(
            service_id::REQUEST_DOWNLOAD,
            &[
                LENGTH_FORMAT_ID,
                (self.max_block_size >> 8) as u8,
                (self.max_block_size & 0xFF) as u8,
            ],
        )
    }

    pub fn handle_transfer_exit(&self, request: &[u8]) -> Vec<u8> {
        if request.len() != 1 {
            return negative_response(
                service_id::REQUEST_TRANSFER_EXIT,
                NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat,
            );
        }

        let state = self.dids.ota_state();
        let download = self.current_request();
        let (Some(download), OtaTransferState::ProcessingTransferComplete) = (download, state)
        else {
            debug!(state = %state, "RequestTransferExit denied: no completed transfer");
            return negative_response(
                service_id::REQUEST_TRANSFER_EXIT,
                NegativeResponseCode::RequestSequenceError,
            );
        };

        let written = self.memory.cursor().saturating_sub(download.address);
        let image = match self.memory.read_region(download.address, written) {
            Ok(image) => image,
            Err(e) => {
                warn!(error = %e, "RequestTransferExit: cannot read back image");
                return negative_response(
                    service_id::REQUEST_TRANSFER_EXIT,
                    NegativeResponseCode::GeneralProgrammingFailure,
                );
            }
        };

        if let Err(state) = self.dids.transition_ota(
            |state| state == OtaTransferState::ProcessingTransferComplete,
            OtaTransferState::Idle,
        ) {
            debug!(state = %state, "RequestTransferExit denied: state changed");
            return negative_response(
                service_id::REQUEST_TRANSFER_EXIT,
                NegativeResponseCode::RequestSequenceError,
            );
        }
        *self.published.lock() = None;

        let crc32 = CRC32.checksum(&image);
        info!(
            address = format!("0x{:08X}", download.address),
            bytes = written,
            crc32 = format!("0x{:08X}", crc32),
            "RequestTransferExit: transfer closed"
        );

        positive_response(service_id::REQUEST_TRANSFER_EXIT, &crc32.to_be_bytes())
    }
}

fn be_value(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |value, byte| (value << 8) | u64::from(*byte))
}
