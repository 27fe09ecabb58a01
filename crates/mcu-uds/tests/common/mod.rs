//! Shared fixture: an MCU on a temp backing file with a manual clock

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use mcu_uds::config::McuConfig;
use mcu_uds::isotp::Sdu;
use mcu_uds::uds::compute_key;
use mcu_uds::{FrameId, ManualClock, McuContext, MemoryStore, ServiceRouter};
use tempfile::{NamedTempFile, TempDir};

pub const UNIT_ID: u8 = 0x10;
pub const API_ID: u8 = 0xFA;

pub struct TestMcu {
    pub clock: Arc<ManualClock>,
    pub router: ServiceRouter,
    pub staging: TempDir,
    _backing: NamedTempFile,
}

impl TestMcu {
    pub fn new(memory_size: u64, max_block_size: u16) -> Self {
        let backing = NamedTempFile::new().unwrap();
        backing.as_file().set_len(memory_size).unwrap();
        let staging = TempDir::new().unwrap();

        let mut config = McuConfig::default();
        config.unit_id = UNIT_ID;
        config.api_id = API_ID;
        config.memory.backing_path = backing.path().to_path_buf();
        config.memory.size = memory_size;
        config.transfer.max_block_size = max_block_size;
        config.transfer.staging_dir = staging.path().to_path_buf();
        config.validate().unwrap();

        let clock = Arc::new(ManualClock::new());
        let memory = MemoryStore::open(&config.memory).unwrap();
        let context = Arc::new(McuContext::new(config, memory, clock.clone()));

        Self {
            clock,
            router: ServiceRouter::new(context),
            staging,
            _backing: backing,
        }
    }

    pub fn context(&self) -> &McuContext {
        self.router.context()
    }

    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }

    /// Put a staged image for `target` in the staging directory
    pub fn stage_image(&self, target: u8, image: &[u8]) {
        let path = self.context().config().transfer.staged_image_path(target);
        std::fs::write(path, image).unwrap();
    }

    /// Send a request from the API to this MCU, on behalf of `target`
    pub fn request_for(&self, target: u8, data: &[u8]) -> Vec<u8> {
        self.router.dispatch(&Sdu {
            id: FrameId::new(target, UNIT_ID, API_ID),
            data: data.to_vec(),
        })
    }

    pub fn request(&self, data: &[u8]) -> Vec<u8> {
        self.request_for(0x00, data)
    }

    /// Enter the programming session and pass security access
    pub fn unlock_programming(&self) {
        assert_eq!(self.request(&[0x10, 0x02])[..2], [0x50, 0x02]);
        let seed = self.request(&[0x27, 0x01])[2..].to_vec();
        let mut key_request = vec![0x27, 0x02];
        key_request.extend(compute_key(&seed));
        assert_eq!(self.request(&key_request), vec![0x67, 0x02]);
    }

    /// RequestDownload with 4-byte address and size
    pub fn request_download(&self, address: u32, size: u32) -> Vec<u8> {
        let mut request = vec![0x34, 0x00, 0x44];
        request.extend_from_slice(&address.to_be_bytes());
        request.extend_from_slice(&size.to_be_bytes());
        self.request(&request)
    }
}
