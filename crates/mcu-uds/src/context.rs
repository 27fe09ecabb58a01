//! MCU context: the services and shared state of one MCU node
//!
//! Built once at startup and shared by handle with the router and the timer
//! task. Nothing in the crate reaches for a process-wide instance.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::McuConfig;
use crate::did::DidStore;
use crate::error::McuError;
use crate::memory::MemoryStore;
use crate::timer::{Clock, SystemClock};
use crate::uds::{
    DataIdentifierService, RequestDownloadService, SecurityAccessService, SessionService,
    TransferDataService,
};

pub struct McuContext {
    config: McuConfig,
    dids: Arc<DidStore>,
    memory: Arc<MemoryStore>,
    security: Arc<SecurityAccessService>,
    session: Arc<SessionService>,
    download: Arc<RequestDownloadService>,
    transfer: TransferDataService,
    data: DataIdentifierService,
}

impl McuContext {
    /// Validate the configuration, open the backing store and use the wall clock
    pub fn open(config: McuConfig) -> Result<Self, McuError> {
        config.validate()?;
        let memory = MemoryStore::open(&config.memory)?;
        Ok(Self::new(config, memory, Arc::new(SystemClock)))
    }

    /// Wire up all services around an already opened memory store
    pub fn new(config: McuConfig, memory: MemoryStore, clock: Arc<dyn Clock>) -> Self {
        let dids = Arc::new(DidStore::new(env!("CARGO_PKG_VERSION")));
        let memory = Arc::new(memory);

        let security = Arc::new(SecurityAccessService::new(
            &config.security,
            clock.clone(),
        ));
        let session = Arc::new(SessionService::new(
            clock,
            Duration::from_millis(config.session.s3_timeout_ms),
            security.clone(),
        ));
        let download = Arc::new(RequestDownloadService::new(
            config.transfer.max_block_size,
            session.clone(),
            security.clone(),
            dids.clone(),
            memory.clone(),
        ));
        let transfer = TransferDataService::new(
            config.transfer.clone(),
            download.clone(),
            dids.clone(),
            memory.clone(),
        );
        let data = DataIdentifierService::new(dids.clone());

        info!(
            unit_id = format!("0x{:02X}", config.unit_id),
            api_id = format!("0x{:02X}", config.api_id),
            "MCU context ready"
        );

        Self {
            config,
            dids,
            memory,
            security,
            session,
            download,
            transfer,
            data,
        }
    }

    pub fn config(&self) -> &McuConfig {
        &self.config
    }

    pub fn unit_id(&self) -> u8 {
        self.config.unit_id
    }

    pub fn api_id(&self) -> u8 {
        self.config.api_id
    }

    pub fn dids(&self) -> &DidStore {
        &self.dids
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn security(&self) -> &SecurityAccessService {
        &self.security
    }

    pub fn session(&self) -> &SessionService {
        &self.session
    }

    pub fn download(&self) -> &RequestDownloadService {
        &self.download
    }

    pub fn transfer(&self) -> &TransferDataService {
        &self.transfer
    }

    pub fn data(&self) -> &DataIdentifierService {
        &self.data
    }

    /// Tick the S3 keep-alive and the security lockout
    pub fn poll_timers(&self) {
        self.session.poll_keepalive();
        self.security.poll();
    }

    /// Called once the timer task is gone. A running security lockout is
    /// left alone; it still expires lazily on the next request.
    pub fn stop_timers(&self) {
        self.session.stop_keepalive();
    }
}
