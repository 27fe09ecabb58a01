//! Frame routing and service dispatch
//!
//! For every frame the router decides between four outcomes, using the
//! identifier fields only:
//!
//! | destination | for-destination flag | sender        | action                              |
//! |-------------|----------------------|---------------|-------------------------------------|
//! | 0xFF        | any                  | any           | echo the test frame on the bus      |
//! | this unit   | set                  | any           | serve locally, reply on reversed id |
//! | this unit   | clear                | API           | forward verbatim to the API         |
//! | this unit   | clear                | peer          | forward to the peer on reversed id  |
//!
//! Frames for other destinations are not ours and are dropped. The flag
//! shares bit 7 with the sender byte, so the API is matched on the low seven
//! bits of its id.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::context::McuContext;
use crate::frame::{Frame, FrameId, BROADCAST_TEST_ID};
use crate::isotp::{segment, Reassembler, Reassembly, Sdu};
use crate::uds::{negative_response, response_nrc, service_id, NegativeResponseCode};

const SENDER_MASK: u8 = 0x7F;

/// A frame the router wants sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send on the peer bus
    Bus(Frame),
    /// Send on the API channel (the bus when no separate channel exists)
    Api(Frame),
}

impl Outbound {
    pub fn frame(&self) -> &Frame {
        match self {
            Self::Bus(frame) | Self::Api(frame) => frame,
        }
    }
}

pub struct ServiceRouter {
    context: Arc<McuContext>,
    reassembler: Reassembler,
}

impl ServiceRouter {
    pub fn new(context: Arc<McuContext>) -> Self {
        Self {
            context,
            reassembler: Reassembler::new(),
        }
    }

    pub fn context(&self) -> &McuContext {
        &self.context
    }

    fn is_api(&self, sender: u8) -> bool {
        sender & SENDER_MASK == self.context.api_id() & SENDER_MASK
    }

    /// Route one received frame, returning the frames to send in order
    pub fn route(&mut self, frame: &Frame) -> Vec<Outbound> {
        let id = frame.id();

        if id.destination == BROADCAST_TEST_ID {
            info!(can_id = %id, "Test frame received, echoing");
            return vec![Outbound::Bus(frame.clone())];
        }

        if id.destination != self.context.unit_id() {
            debug!(can_id = %id, "Frame not addressed to this unit");
            return Vec::new();
        }

        if !id.is_for_destination() {
            if self.is_api(id.sender) {
                debug!(can_id = %id, "Forwarding frame to API");
                return vec![Outbound::Api(frame.clone())];
            }
            let forwarded = frame.with_id(id.reversed());
            debug!(
                can_id = %id,
                forwarded_id = %forwarded.id(),
                "Forwarding frame to peer unit"
            );
            return vec![Outbound::Bus(forwarded)];
        }

        match self.reassembler.push(frame) {
            Ok(Reassembly::Complete(sdu)) => {
                let response = self.dispatch(&sdu);
                self.reply(id, &response)
            }
            Ok(Reassembly::Incomplete) | Ok(Reassembly::Ignored) => Vec::new(),
            Err(e) => match e.sid() {
                Some(sid) => {
                    debug!(can_id = %id, error = %e, "Malformed request");
                    self.reply(
                        id,
                        &negative_response(
                            sid,
                            NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat,
                        ),
                    )
                }
                None => {
                    warn!(can_id = %id, error = %e, "Dropping malformed frame");
                    Vec::new()
                }
            },
        }
    }

    /// Hand a complete request to the service owning its SID
    pub fn dispatch(&self, sdu: &Sdu) -> Vec<u8> {
        let request = sdu.data.as_slice();
        let sid = sdu.sid();
        let context = &self.context;

        let response = match sid {
            service_id::DIAGNOSTIC_SESSION_CONTROL => {
                context.session().handle_session_control(request)
            }
            service_id::READ_DATA_BY_ID => context.data().handle_read(request),
            service_id::WRITE_DATA_BY_ID => context.data().handle_write(request),
            service_id::SECURITY_ACCESS => context.security().handle(request),
            service_id::REQUEST_DOWNLOAD => context.download().handle_request_download(request),
            service_id::TRANSFER_DATA => context.transfer().handle(sdu.id, request),
            service_id::REQUEST_TRANSFER_EXIT => context.download().handle_transfer_exit(request),
            service_id::TESTER_PRESENT => context.session().handle_tester_present(request),
            _ => {
                debug!(service_id = format!("0x{:02X}", sid), "Unsupported service");
                negative_response(sid, NegativeResponseCode::ServiceNotSupported)
            }
        };

        if let Some(nrc) = response_nrc(&response) {
            debug!(
                service_id = format!("0x{:02X}", sid),
                nrc = format!("0x{:02X}", nrc),
                reason = %nrc,
                "Request rejected"
            );
        }
        response
    }

    fn reply(&self, request_id: FrameId, response: &[u8]) -> Vec<Outbound> {
        let reply_id = request_id.reversed();
        let frames = match segment(reply_id, response) {
            Ok(frames) => frames,
            Err(e) => {
                error!(can_id = %reply_id, error = %e, "Cannot frame response");
                return Vec::new();
            }
        };

        let to_api = self.is_api(reply_id.destination);
        frames
            .into_iter()
            .map(|frame| {
                if to_api {
                    Outbound::Api(frame)
                } else {
                    Outbound::Bus(frame)
                }
            })
            .collect()
    }
}
