//! ReadDataByIdentifier (0x22) and WriteDataByIdentifier (0x2E) over the DID store
//!
//! The software version is read-only. The OTA status may only be written
//! back to Idle, and only while no transfer is active; every other OTA state
//! is owned by the download and transfer services.

use std::sync::Arc;

use tracing::{debug, info};

use super::{negative_response, positive_response, service_id, NegativeResponseCode};
use crate::did::{did, DidStore, OtaTransferState};

pub struct DataIdentifierService {
    dids: Arc<DidStore>,
}

impl DataIdentifierService {
    pub fn new(dids: Arc<DidStore>) -> Self {
        Self { dids }
    }

    pub fn handle_read(&self, request: &[u8]) -> Vec<u8> {
        if request.len() != 3 {
            return negative_response(
                service_id::READ_DATA_BY_ID,
                NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat,
            );
        }

        let did = u16::from_be_bytes([request[1], request[2]]);
        match self.dids.get(did) {
            Some(value) => {
                debug!(did = format!("0x{:04X}", did), value = %hex::encode(&value), "Read DID");
                let mut response_data = did.to_be_bytes().to_vec();
                response_data.extend_from_slice(&value);
                positive_response(service_id::READ_DATA_BY_ID, &response_data)
            }
            None => {
                debug!(did = format!("0x{:04X}", did), "Unknown DID");
                negative_response(
                    service_id::READ_DATA_BY_ID,
                    NegativeResponseCode::RequestOutOfRange,
                )
            }
        }
    }

    pub fn handle_write(&self, request: &[u8]) -> Vec<u8> {
        if request.len() < 4 {
            return negative_response(
                service_id::WRITE_DATA_BY_ID,
                NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat,
            );
        }

        let did = u16::from_be_bytes([request[1], request[2]]);
        let value = &request[3..];

        match did {
            did::OTA_UPDATE_STATUS => self.write_ota_status(value),
            did::SOFTWARE_VERSION => {
                debug!(did = format!("0x{:04X}", did), "Write denied: read-only DID");
                negative_response(
                    service_id::WRITE_DATA_BY_ID,
                    NegativeResponseCode::GeneralProgrammingFailure,
                )
            }
            _ => {
                debug!(did = format!("0x{:04X}", did), "Unknown DID");
                negative_response(
                    service_id::WRITE_DATA_BY_ID,
                    NegativeResponseCode::RequestOutOfRange,
                )
            }
        }
    }

    fn write_ota_status(&self, value: &[u8]) -> Vec<u8> {
        let [byte] = value else {
            return negative_response(
                service_id::WRITE_DATA_BY_ID,
                NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat,
            );
        };
        if OtaTransferState::from_byte(*byte) != Some(OtaTransferState::Idle) {
            debug!(value = format!("0x{:02X}", byte), "Write denied: OTA status can only be reset");
            return negative_response(
                service_id::WRITE_DATA_BY_ID,
                NegativeResponseCode::RequestOutOfRange,
            );
        }

        match self
            .dids
            .transition_ota(|state| !state.is_active(), OtaTransferState::Idle)
        {
            Ok(previous) => {
                info!(from = %previous, "OTA status reset");
                positive_response(
                    service_id::WRITE_DATA_BY_ID,
                    &did::OTA_UPDATE_STATUS.to_be_bytes(),
                )
            }
            Err(state) => {
                debug!(state = %state, "Write denied: transfer in progress");
                negative_response(
                    service_id::WRITE_DATA_BY_ID,
                    NegativeResponseCode::ConditionsNotCorrect,
                )
            }
        }
    }
}
