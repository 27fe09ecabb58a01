//! UDS (Unified Diagnostic Services) server side
//!
//! Each service takes a request SDU (SID first) and returns the response SDU.
//! Rejections are ordinary responses built with [`negative_response`]; no
//! protocol error ever leaves a service as a Rust error.

mod data;
mod download;
mod nrc;
mod security;
mod session;
mod transfer;

pub use data::DataIdentifierService;
pub use download::{DownloadRequest, RequestDownloadService};
pub use nrc::NegativeResponseCode;
pub use security::{compute_key, SecurityAccessService, SecurityLevel};
pub use session::{DiagnosticSession, SessionService};
pub use transfer::{
    next_sequence, xor_checksum, TransferDataService, TransferSource, TransferSummary,
};

/// UDS service IDs handled by the MCU
pub mod service_id {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const READ_DATA_BY_ID: u8 = 0x22;
    pub const WRITE_DATA_BY_ID: u8 = 0x2E;
    pub const SECURITY_ACCESS: u8 = 0x27;
    pub const REQUEST_DOWNLOAD: u8 = 0x34;
    pub const TRANSFER_DATA: u8 = 0x36;
    pub const REQUEST_TRANSFER_EXIT: u8 = 0x37;
    pub const TESTER_PRESENT: u8 = 0x3E;
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;
}

/// SecurityAccess (0x27) sub-functions
pub mod security_sub_function {
    pub const REQUEST_SEED: u8 = 0x01;
    pub const SEND_KEY: u8 = 0x02;
}

/// DiagnosticSessionControl (0x10) sub-functions
pub mod session_type {
    pub const DEFAULT: u8 = 0x01;
    pub const PROGRAMMING: u8 = 0x02;
    pub const EXTENDED: u8 = 0x03;
}

/// Create a positive response for a service
pub fn positive_response(service_id: u8, data: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(1 + data.len());
    response.push(service_id + 0x40); // Positive response = service + 0x40
    response.extend_from_slice(data);
    response
}

/// Create a negative response
pub fn negative_response(service_id: u8, nrc: NegativeResponseCode) -> Vec<u8> {
    vec![service_id::NEGATIVE_RESPONSE, service_id, nrc.into()]
}

/// NRC carried by a response, if it is negative
pub fn response_nrc(response: &[u8]) -> Option<NegativeResponseCode> {
    match response {
        [service_id::NEGATIVE_RESPONSE, _, nrc] => Some(NegativeResponseCode::from(*nrc)),
        _ => None,
    }
}
