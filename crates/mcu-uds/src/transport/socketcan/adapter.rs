//! Raw SocketCAN frame transport

use std::io::ErrorKind;
use std::time::Duration;

use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame as _, Socket};
use tracing::debug;

use crate::frame::Frame;
use crate::transport::{FrameTransport, TransportError};

/// Raw CAN socket using 29-bit identifiers
pub struct SocketCanTransport {
    interface: String,
    socket: CanSocket,
}

impl SocketCanTransport {
    pub fn open(interface: &str) -> Result<Self, TransportError> {
        let socket = CanSocket::open(interface).map_err(|e| {
            TransportError::ConnectionFailed(format!(
                "Failed to open raw CAN socket on {}: {}",
                interface, e
            ))
        })?;

        debug!(interface, "Opened raw CAN socket");
        Ok(Self {
            interface: interface.to_string(),
            socket,
        })
    }
}

impl FrameTransport for SocketCanTransport {
    fn name(&self) -> &str {
        &self.interface
    }

    fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let can_id = ExtendedId::new(frame.raw_id()).ok_or_else(|| {
            TransportError::InvalidConfig(format!(
                "Invalid extended CAN ID: 0x{:X}",
                frame.raw_id()
            ))
        })?;
        let can_frame = CanFrame::new(can_id, frame.data()).ok_or_else(|| {
            TransportError::SendFailed(format!("Cannot build CAN frame from {:?}", frame))
        })?;

        self.socket
            .write_frame(&can_frame)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Frame>, TransportError> {
        match self.socket.read_frame_timeout(timeout) {
            Ok(CanFrame::Data(data_frame)) => {
                Ok(Some(Frame::new(data_frame.raw_id(), data_frame.data())?))
            }
            Ok(other) => {
                debug!(can_id = format!("0x{:08X}", other.raw_id()), "Ignoring non-data frame");
                Ok(None)
            }
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(TransportError::ReceiveFailed(e.to_string())),
        }
    }
}
