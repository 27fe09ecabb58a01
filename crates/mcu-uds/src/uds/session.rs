//! Diagnostic session and S3 keep-alive
//!
//! The S3 timer is armed at construction, on every accepted TesterPresent and
//! on every session change. When it runs out the session falls back to
//! Default and the timer stays disarmed until the next TesterPresent.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{
    negative_response, positive_response, service_id, session_type, NegativeResponseCode,
    SecurityAccessService,
};
use crate::timer::{Clock, ScheduledTimer};

/// P2 server max (25 ms) and P2* server max (500 x 10 ms) as sent in the
/// DiagnosticSessionControl response
const SESSION_TIMING: [u8; 4] = [0x00, 0x19, 0x01, 0xF4];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSession {
    Default,
    Programming,
    Extended,
}

impl DiagnosticSession {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            session_type::DEFAULT => Some(Self::Default),
            session_type::PROGRAMMING => Some(Self::Programming),
            session_type::EXTENDED => Some(Self::Extended),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Default => session_type::DEFAULT,
            Self::Programming => session_type::PROGRAMMING,
            Self::Extended => session_type::EXTENDED,
        }
    }
}

impl fmt::Display for DiagnosticSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub struct SessionService {
    current: Mutex<DiagnosticSession>,
    s3: ScheduledTimer,
    security: Arc<SecurityAccessService>,
}

impl SessionService {
    pub fn new(
        clock: Arc<dyn Clock>,
        s3_timeout: Duration,
        security: Arc<SecurityAccessService>,
    ) -> Self {
        let s3 = ScheduledTimer::new(clock, s3_timeout);
        s3.arm();
        Self {
            current: Mutex::new(DiagnosticSession::Default),
            s3,
            security,
        }
    }

    pub fn current(&self) -> DiagnosticSession {
        *self.current.lock()
    }

    /// Whether the S3 timer is counting down
    pub fn keepalive_armed(&self) -> bool {
        self.s3.is_armed()
    }

    /// Disarm S3 once nothing polls it any more
    pub fn stop_keepalive(&self) {
        self.s3.cancel();
        debug!("S3 keep-alive stopped");
    }

    pub fn handle_tester_present(&self, request: &[u8]) -> Vec<u8> {
        if request.len() != 2 {
            return negative_response(
                service_id::TESTER_PRESENT,
                NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat,
            );
        }
        if request[1] != 0x00 {
            debug!(
                sub_function = format!("0x{:02X}", request[1]),
                "Unsupported tester present sub-function"
            );
            return negative_response(
                service_id::TESTER_PRESENT,
                NegativeResponseCode::SubFunctionNotSupported,
            );
        }

        self.s3.arm();
        debug!(session = %self.current(), "Tester present");
        positive_response(service_id::TESTER_PRESENT, &[0x00])
    }

    pub fn handle_session_control(&self, request: &[u8]) -> Vec<u8> {
        if request.len() != 2 {
            return negative_response(
                service_id::DIAGNOSTIC_SESSION_CONTROL,
                NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat,
            );
        }

        let Some(session) = DiagnosticSession::from_byte(request[1]) else {
            debug!(
                session = format!("0x{:02X}", request[1]),
                "Unsupported session type"
            );
            return negative_response(
                service_id::DIAGNOSTIC_SESSION_CONTROL,
                NegativeResponseCode::SubFunctionNotSupported,
            );
        };

        let previous = std::mem::replace(&mut *self.current.lock(), session);
        if previous != session {
            self.security.relock();
            info!(from = %previous, to = %session, "Session changed");
        }
        self.s3.arm();

        let mut response_data = vec![session.as_byte()];
        response_data.extend_from_slice(&SESSION_TIMING);
        positive_response(service_id::DIAGNOSTIC_SESSION_CONTROL, &response_data)
    }

    /// Timer tick: fall back to the default session once S3 runs out.
    ///
    /// Returns true when the timer expired on this call.
    pub fn poll_keepalive(&self) -> bool {
        if !self.s3.poll() {
            return false;
        }

        let previous = std::mem::replace(&mut *self.current.lock(), DiagnosticSession::Default);
        if previous != DiagnosticSession::Default {
            self.security.relock();
        }
        info!(from = %previous, "S3 timeout, session reset to Default");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::timer::ManualClock;

    fn service() -> (Arc<ManualClock>, SessionService) {
        let clock = Arc::new(ManualClock::new());
        let security = Arc::new(SecurityAccessService::new(
            &SecurityConfig::default(),
            clock.clone(),
        ));
        let service = SessionService::new(clock.clone(), Duration::from_secs(5), security);
        (clock, service)
    }

    #[test]
    fn test_tester_present_validation() {
        let (_clock, service) = service();
        assert_eq!(service.handle_tester_present(&[0x3E, 0x00]), vec![0x7E, 0x00]);
        assert_eq!(service.handle_tester_present(&[0x3E]), vec![0x7F, 0x3E, 0x13]);
        assert_eq!(
            service.handle_tester_present(&[0x3E, 0x00, 0x00]),
            vec![0x7F, 0x3E, 0x13]
        );
        assert_eq!(service.handle_tester_present(&[0x3E, 0x80]), vec![0x7F, 0x3E, 0x12]);
    }

    #[test]
    fn test_session_change() {
        let (_clock, service) = service();
        assert_eq!(
            service.handle_session_control(&[0x10, 0x02]),
            vec![0x50, 0x02, 0x00, 0x19, 0x01, 0xF4]
        );
        assert_eq!(service.current(), DiagnosticSession::Programming);

        assert_eq!(
            service.handle_session_control(&[0x10, 0x7F]),
            vec![0x7F, 0x10, 0x12]
        );
        assert_eq!(service.handle_session_control(&[0x10]), vec![0x7F, 0x10, 0x13]);
        assert_eq!(service.current(), DiagnosticSession::Programming);
    }

    #[test]
    fn test_keepalive_holds_session() {
        let (clock, service) = service();
        service.handle_session_control(&[0x10, 0x03]);

        clock.advance(Duration::from_secs(4));
        assert!(!service.poll_keepalive());
        service.handle_tester_present(&[0x3E, 0x00]);

        clock.advance(Duration::from_secs(4));
        assert!(!service.poll_keepalive());
        assert_eq!(service.current(), DiagnosticSession::Extended);
    }

    #[test]
    fn test_stopped_keepalive_never_fires() {
        let (clock, service) = service();
        service.handle_session_control(&[0x10, 0x02]);
        service.stop_keepalive();
        assert!(!service.keepalive_armed());

        clock.advance(Duration::from_secs(30));
        assert!(!service.poll_keepalive());
        assert_eq!(service.current(), DiagnosticSession::Programming);
    }

    #[test]
    fn test_silence_reverts_to_default() {
        let (clock, service) = service();
        service.handle_session_control(&[0x10, 0x02]);

        clock.advance(Duration::from_secs(5));
        assert!(service.poll_keepalive());
        assert_eq!(service.current(), DiagnosticSession::Default);
        assert!(!service.keepalive_armed());

        // Stopped until the next tester present
        clock.advance(Duration::from_secs(10));
        assert!(!service.poll_keepalive());

        service.handle_tester_present(&[0x3E, 0x00]);
        assert!(service.keepalive_armed());
    }

    #[test]
    fn test_rejected_tester_present_does_not_rearm() {
        let (clock, service) = service();
        clock.advance(Duration::from_secs(4));
        service.handle_tester_present(&[0x3E, 0x01]);
        clock.advance(Duration::from_secs(1));
        assert!(service.poll_keepalive());
    }
}
