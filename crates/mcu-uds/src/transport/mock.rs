//! Mock transport for testing

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{FrameTransport, TransportError};
use crate::frame::Frame;
use crate::queue::FrameQueue;

/// In-memory transport: tests inject received frames and inspect sent ones
pub struct MockTransport {
    name: String,
    connected: AtomicBool,
    incoming: FrameQueue,
    sent: Mutex<Vec<Frame>>,
    sent_cond: Condvar,
}

impl MockTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: AtomicBool::new(true),
            incoming: FrameQueue::new(),
            sent: Mutex::new(Vec::new()),
            sent_cond: Condvar::new(),
        }
    }

    /// Queue a frame for the next `receive`
    pub fn inject(&self, frame: Frame) {
        self.incoming.push(frame);
    }

    /// Frames sent so far
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent.lock().clone()
    }

    /// Remove and return the frames sent so far
    pub fn take_sent(&self) -> Vec<Frame> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Block until at least `count` frames were sent or `timeout` passes
    pub fn wait_for_sent(&self, count: usize, timeout: Duration) -> Vec<Frame> {
        let deadline = Instant::now() + timeout;
        let mut sent = self.sent.lock();
        while sent.len() < count {
            if self.sent_cond.wait_until(&mut sent, deadline).timed_out() {
                break;
            }
        }
        sent.clone()
    }

    /// Set connection state
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl FrameTransport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        tracing::debug!(?frame, interface = %self.name, "Mock transport: sent frame");
        self.sent.lock().push(frame.clone());
        self.sent_cond.notify_all();
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Frame>, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(self.incoming.pop_timeout(timeout))
    }
}
