//! Data identifier store
//!
//! Key/value map from DID to raw bytes. The OTA progress state lives here and
//! is the only channel services use to coordinate a firmware transfer, so all
//! state changes go through [`DidStore::transition_ota`] which checks and
//! updates under one lock.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use tracing::info;

/// Well-known DIDs served by the MCU
pub mod did {
    /// MCU software version
    pub const SOFTWARE_VERSION: u16 = 0x1010;
    /// OTA update progress, one [`OtaTransferState`](super::OtaTransferState) byte
    pub const OTA_UPDATE_STATUS: u16 = 0xE001;
}

/// Progress of an over-the-air update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaTransferState {
    Idle,
    WaitDownloadCompleted,
    Processing,
    ProcessingTransferFailed,
    ProcessingTransferComplete,
}

impl OtaTransferState {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Idle),
            0x10 => Some(Self::WaitDownloadCompleted),
            0x20 => Some(Self::Processing),
            0x21 => Some(Self::ProcessingTransferFailed),
            0x22 => Some(Self::ProcessingTransferComplete),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Idle => 0x00,
            Self::WaitDownloadCompleted => 0x10,
            Self::Processing => 0x20,
            Self::ProcessingTransferFailed => 0x21,
            Self::ProcessingTransferComplete => 0x22,
        }
    }

    /// A transfer has been requested or is running
    pub fn is_active(self) -> bool {
        matches!(self, Self::WaitDownloadCompleted | Self::Processing)
    }
}

impl fmt::Display for OtaTransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::WaitDownloadCompleted => write!(f, "WaitDownloadCompleted"),
            Self::Processing => write!(f, "Processing"),
            Self::ProcessingTransferFailed => write!(f, "ProcessingTransferFailed"),
            Self::ProcessingTransferComplete => write!(f, "ProcessingTransferComplete"),
        }
    }
}

/// Mutex-guarded DID map
pub struct DidStore {
    values: Mutex<HashMap<u16, Vec<u8>>>,
}

impl DidStore {
    /// Store seeded with the MCU's own identifiers and an idle OTA state
    pub fn new(software_version: &str) -> Self {
        let mut values = HashMap::new();
        values.insert(did::SOFTWARE_VERSION, software_version.as_bytes().to_vec());
        values.insert(
            did::OTA_UPDATE_STATUS,
            vec![OtaTransferState::Idle.as_byte()],
        );
        Self {
            values: Mutex::new(values),
        }
    }

    pub fn get(&self, did: u16) -> Option<Vec<u8>> {
        self.values.lock().get(&did).cloned()
    }

    /// Current OTA state. An unreadable value counts as idle.
    pub fn ota_state(&self) -> OtaTransferState {
        self.values
            .lock()
            .get(&did::OTA_UPDATE_STATUS)
            .and_then(|v| v.first().copied())
            .and_then(OtaTransferState::from_byte)
            .unwrap_or(OtaTransferState::Idle)
    }

    pub fn set_ota_state(&self, state: OtaTransferState) {
        let _ = self.transition_ota(|_| true, state);
    }

    /// Move to `to` only if the current state satisfies `allowed`.
    ///
    /// Returns the state observed before the attempt, whether or not the
    /// transition happened.
    pub fn transition_ota(
        &self,
        allowed: impl FnOnce(OtaTransferState) -> bool,
        to: OtaTransferState,
    ) -> Result<OtaTransferState, OtaTransferState> {
        let mut values = self.values.lock();
        let current = values
            .get(&did::OTA_UPDATE_STATUS)
            .and_then(|v| v.first().copied())
            .and_then(OtaTransferState::from_byte)
            .unwrap_or(OtaTransferState::Idle);

        if !allowed(current) {
            return Err(current);
        }
        values.insert(did::OTA_UPDATE_STATUS, vec![to.as_byte()]);
        drop(values);

        if current != to {
            info!(from = %current, to = %to, "OTA state changed");
        }
        Ok(current)
    }
}
