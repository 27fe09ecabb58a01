//! Thread-safe FIFO between the ingress and processing tasks

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::frame::Frame;

#[derive(Default)]
struct QueueState {
    frames: VecDeque<Frame>,
    closed: bool,
}

/// Unbounded frame queue with blocking dequeue.
///
/// Producers never block. Consumers park on a condition variable until a frame
/// arrives or the queue is closed; after `close()` the remaining frames are
/// still handed out, then `pop` returns `None`.
#[derive(Default)]
pub struct FrameQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame. Frames pushed after `close()` are dropped.
    pub fn push(&self, frame: Frame) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.frames.push_back(frame);
        drop(state);
        self.available.notify_one();
        true
    }

    /// Block until a frame is available or the queue is closed and drained
    pub fn pop(&self) -> Option<Frame> {
        let mut state = self.state.lock();
        loop {
            if let Some(frame) = state.frames.pop_front() {
                return Some(frame);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Like `pop`, but gives up after `timeout`
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Frame> {
        let mut state = self.state.lock();
        if state.frames.is_empty() && !state.closed {
            self.available.wait_for(&mut state, timeout);
        }
        state.frames.pop_front()
    }

    /// Wake every waiter and refuse further frames
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
