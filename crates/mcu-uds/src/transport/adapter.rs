//! Frame transport trait

use std::time::Duration;

use super::TransportError;
use crate::frame::Frame;

/// Raw frame I/O on one bus interface.
///
/// Calls block; the dispatcher runs them on blocking worker threads. Receive
/// returns `Ok(None)` when `timeout` elapses without a frame so the caller
/// can check for shutdown.
pub trait FrameTransport: Send + Sync {
    /// Interface name, for logging
    fn name(&self) -> &str;

    /// Transmit one frame
    fn send(&self, frame: &Frame) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next frame
    fn receive(&self, timeout: Duration) -> Result<Option<Frame>, TransportError>;
}
