//! Frame transport layer
//!
//! - SocketCAN transport for raw CAN frames (Linux only)
//! - Mock transport for testing

mod adapter;
pub mod error;
pub mod mock;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub use adapter::FrameTransport;
pub use error::TransportError;
pub use mock::MockTransport;

use std::sync::Arc;

/// Open the transport for a named CAN interface
pub fn open_transport(interface: &str) -> Result<Arc<dyn FrameTransport>, TransportError> {
    #[cfg(all(target_os = "linux", feature = "socketcan"))]
    {
        let transport = socketcan::SocketCanTransport::open(interface)?;
        Ok(Arc::new(transport))
    }
    #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
    {
        Err(TransportError::Unsupported(format!(
            "SocketCAN on {} requires Linux and the 'socketcan' feature",
            interface
        )))
    }
}
