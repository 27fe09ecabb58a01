//! MCU node configuration
//!
//! Loaded from TOML; every field has a default so a missing file section
//! falls back to the values the network was designed around.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete MCU configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McuConfig {
    /// This unit's identifier on the bus
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Identifier used by the external API
    #[serde(default = "default_api_id")]
    pub api_id: u8,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub transfer: TransferConfig,

    #[serde(default)]
    pub memory: MemoryConfig,
}

fn default_unit_id() -> u8 {
    0x10
}

fn default_api_id() -> u8 {
    0xFA
}

impl Default for McuConfig {
    fn default() -> Self {
        Self {
            unit_id: default_unit_id(),
            api_id: default_api_id(),
            transport: TransportConfig::default(),
            security: SecurityConfig::default(),
            session: SessionConfig::default(),
            transfer: TransferConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

impl McuConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Reject values no service can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.unit_id == 0x00 || self.unit_id == crate::frame::BROADCAST_TEST_ID {
            return Err(ConfigError::Invalid(format!(
                "unit_id 0x{:02X} is reserved",
                self.unit_id
            )));
        }
        if self.unit_id == self.api_id {
            return Err(ConfigError::Invalid(format!(
                "unit_id and api_id are both 0x{:02X}",
                self.unit_id
            )));
        }
        if self.security.seed_length == 0 {
            return Err(ConfigError::Invalid("security.seed_length must be > 0".into()));
        }
        if self.security.max_attempts == 0 {
            return Err(ConfigError::Invalid("security.max_attempts must be > 0".into()));
        }
        if self.transfer.max_block_size == 0 {
            return Err(ConfigError::Invalid("transfer.max_block_size must be > 0".into()));
        }
        if self.memory.size == 0 {
            return Err(ConfigError::Invalid("memory.size must be > 0".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// CAN interface shared with peer units
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Separate interface the external API talks on, if any
    #[serde(default)]
    pub api_interface: Option<String>,

    /// How long a blocking receive waits before re-checking for shutdown
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
}

fn default_interface() -> String {
    "vcan0".to_string()
}

fn default_receive_timeout_ms() -> u64 {
    100
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            api_interface: None,
            receive_timeout_ms: default_receive_timeout_ms(),
        }
    }
}

impl TransportConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

// =============================================================================
// Security Access Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Seed length in bytes
    #[serde(default = "default_seed_length")]
    pub seed_length: usize,

    /// Wrong keys tolerated before lockout
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,

    /// Lockout duration after the last allowed wrong key
    #[serde(default = "default_lockout_secs")]
    pub lockout_secs: u64,
}

fn default_seed_length() -> usize {
    4
}

fn default_max_attempts() -> u8 {
    3
}

fn default_lockout_secs() -> u64 {
    5
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            seed_length: default_seed_length(),
            max_attempts: default_max_attempts(),
            lockout_secs: default_lockout_secs(),
        }
    }
}

// =============================================================================
// Session Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// S3 keep-alive timeout
    #[serde(default = "default_s3_timeout_ms")]
    pub s3_timeout_ms: u64,

    /// Tick interval for the timer task
    #[serde(default = "default_timer_poll_ms")]
    pub timer_poll_ms: u64,
}

fn default_s3_timeout_ms() -> u64 {
    5000
}

fn default_timer_poll_ms() -> u64 {
    100
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            s3_timeout_ms: default_s3_timeout_ms(),
            timer_poll_ms: default_timer_poll_ms(),
        }
    }
}

// =============================================================================
// Transfer Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Chunk size published by RequestDownload
    #[serde(default = "default_max_block_size")]
    pub max_block_size: u16,

    /// Directory holding staged firmware images, one `<target>.bin` per unit
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

fn default_max_block_size() -> u16 {
    4096
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./staging")
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_block_size: default_max_block_size(),
            staging_dir: default_staging_dir(),
        }
    }
}

impl TransferConfig {
    /// Staged image for a target unit (0 = this MCU)
    pub fn staged_image_path(&self, target: u8) -> PathBuf {
        self.staging_dir.join(format!("{:02x}.bin", target))
    }
}

// =============================================================================
// Memory Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Backing file or partition device firmware is written to
    #[serde(default = "default_backing_path")]
    pub backing_path: PathBuf,

    /// Byte offset of the firmware region inside the backing store
    #[serde(default)]
    pub base_address: u64,

    /// Size of the firmware region in bytes
    #[serde(default = "default_memory_size")]
    pub size: u64,
}

fn default_backing_path() -> PathBuf {
    PathBuf::from("./firmware.img")
}

fn default_memory_size() -> u64 {
    16 * 1024 * 1024
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backing_path: default_backing_path(),
            base_address: 0,
            size: default_memory_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = McuConfig::from_toml("").unwrap();
        assert_eq!(config.unit_id, 0x10);
        assert_eq!(config.api_id, 0xFA);
        assert_eq!(config.security.max_attempts, 3);
        assert_eq!(config.security.lockout_secs, 5);
        assert_eq!(config.session.s3_timeout_ms, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sections() {
        let toml = r#"
unit_id = 0x20

[transport]
interface = "can1"
api_interface = "vcan9"

[transfer]
max_block_size = 256
staging_dir = "/var/lib/mcu/staging"

[memory]
backing_path = "/dev/loop21"
base_address = 118006272
size = 1048576
"#;
        let config = McuConfig::from_toml(toml).unwrap();
        assert_eq!(config.unit_id, 0x20);
        assert_eq!(config.transport.interface, "can1");
        assert_eq!(config.transport.api_interface.as_deref(), Some("vcan9"));
        assert_eq!(config.transfer.max_block_size, 256);
        assert_eq!(config.memory.base_address, 118006272);
        assert_eq!(
            config.transfer.staged_image_path(0x03),
            PathBuf::from("/var/lib/mcu/staging/03.bin")
        );
    }

    #[test]
    fn test_validate_rejects_reserved_ids() {
        let mut config = McuConfig::default();
        config.unit_id = 0xFF;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.unit_id = 0xFA;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_block_size() {
        let mut config = McuConfig::default();
        config.transfer.max_block_size = 0;
        assert!(config.validate().is_err());
    }
}
