//! SecurityAccess (0x27) seed/key gate
//!
//! The key for a seed is the per-byte two's complement of the seed. After
//! `max_attempts` wrong keys the service locks out for `lockout_secs`; every
//! request during the lockout gets RequiredTimeDelayNotExpired.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, warn};

use super::{
    negative_response, positive_response, security_sub_function, service_id,
    NegativeResponseCode,
};
use crate::config::SecurityConfig;
use crate::timer::{Clock, ScheduledTimer};

/// Security access state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    Locked,
    SeedIssued,
    Unlocked,
    LockedOut,
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct SecurityState {
    level: SecurityLevel,
    attempts: u8,
    seed: Vec<u8>,
}

pub struct SecurityAccessService {
    seed_length: usize,
    max_attempts: u8,
    state: Mutex<SecurityState>,
    lockout: ScheduledTimer,
}

/// Expected key for a seed: bitwise NOT plus one, per byte
pub fn compute_key(seed: &[u8]) -> Vec<u8> {
    seed.iter().map(|b| (!b).wrapping_add(1)).collect()
}

impl SecurityAccessService {
    pub fn new(config: &SecurityConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            seed_length: config.seed_length,
            max_attempts: config.max_attempts,
            state: Mutex::new(SecurityState {
                level: SecurityLevel::Locked,
                attempts: 0,
                seed: Vec::new(),
            }),
            lockout: ScheduledTimer::new(clock, Duration::from_secs(config.lockout_secs)),
        }
    }

    pub fn level(&self) -> SecurityLevel {
        self.state.lock().level
    }

    pub fn is_unlocked(&self) -> bool {
        self.level() == SecurityLevel::Unlocked
    }

    /// Wrong keys counted towards the lockout
    pub fn attempts(&self) -> u8 {
        self.state.lock().attempts
    }

    /// Time left on the lockout, if one is running
    pub fn lockout_remaining(&self) -> Option<Duration> {
        self.lockout.remaining()
    }

    /// Back to Locked with no wrong keys counted. A running lockout is kept.
    pub fn relock(&self) {
        let mut state = self.state.lock();
        if state.level == SecurityLevel::LockedOut {
            return;
        }
        if state.level != SecurityLevel::Locked || state.attempts != 0 {
            info!(
                from = %state.level,
                attempts = state.attempts,
                "Security access relocked"
            );
        }
        state.level = SecurityLevel::Locked;
        state.attempts = 0;
        state.seed.clear();
    }

    /// Timer tick: end the lockout once its deadline passes.
    ///
    /// Returns true when the lockout ended on this call.
    pub fn poll(&self) -> bool {
        let mut state = self.state.lock();
        self.expire_lockout(&mut state)
    }

    fn expire_lockout(&self, state: &mut SecurityState) -> bool {
        if state.level == SecurityLevel::LockedOut && self.lockout.poll() {
            state.level = SecurityLevel::Locked;
            state.attempts = 0;
            info!("Security access lockout expired");
            return true;
        }
        false
    }

    /// Handle a SecurityAccess request SDU
    pub fn handle(&self, request: &[u8]) -> Vec<u8> {
        let mut state = self.state.lock();
        self.expire_lockout(&mut state);

        if state.level == SecurityLevel::LockedOut {
            debug!(
                remaining_ms = self
                    .lockout
                    .remaining()
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0),
                "Security access rejected: lockout active"
            );
            return negative_response(
                service_id::SECURITY_ACCESS,
                NegativeResponseCode::RequiredTimeDelayNotExpired,
            );
        }

        if request.len() < 2 {
            return negative_response(
                service_id::SECURITY_ACCESS,
                NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat,
            );
        }

        match request[1] {
            security_sub_function::REQUEST_SEED => self.request_seed(&mut state, request),
            security_sub_function::SEND_KEY => self.send_key(&mut state, &request[2..]),
            other => {
                debug!(
                    sub_function = format!("0x{:02X}", other),
                    "Unsupported security access sub-function"
                );
                negative_response(
                    service_id::SECURITY_ACCESS,
                    NegativeResponseCode::SubFunctionNotSupported,
                )
            }
        }
    }

    fn request_seed(&self, state: &mut SecurityState, request: &[u8]) -> Vec<u8> {
        if request.len() != 2 {
            return negative_response(
                service_id::SECURITY_ACCESS,
                NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat,
            );
        }

        let mut response_data = vec![security_sub_function::REQUEST_SEED];

        // Already unlocked: answer with a zero seed and stay unlocked
        if state.level == SecurityLevel::Unlocked {
            debug!("Security access: already unlocked, sending zero seed");
            response_data.resize(1 + self.seed_length, 0x00);
            return positive_response(service_id::SECURITY_ACCESS, &response_data);
        }

        let mut rng = rand::thread_rng();
        let seed: Vec<u8> = (0..self.seed_length).map(|_| rng.gen()).collect();

        info!(seed = %hex::encode(&seed), "Security access: providing seed");
        response_data.extend_from_slice(&seed);
        state.seed = seed;
        state.level = SecurityLevel::SeedIssued;

        positive_response(service_id::SECURITY_ACCESS, &response_data)
    }

    fn send_key(&self, state: &mut SecurityState, key: &[u8]) -> Vec<u8> {
        if state.level != SecurityLevel::SeedIssued {
            debug!(level = %state.level, "Security access: key without outstanding seed");
            return negative_response(
                service_id::SECURITY_ACCESS,
                NegativeResponseCode::RequestSequenceError,
            );
        }

        if key.len() != self.seed_length {
            return negative_response(
                service_id::SECURITY_ACCESS,
                NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat,
            );
        }

        let expected_key = compute_key(&state.seed);
        state.seed.clear();

        if key == expected_key.as_slice() {
            info!("Security access: key accepted");
            state.level = SecurityLevel::Unlocked;
            state.attempts = 0;
            return positive_response(
                service_id::SECURITY_ACCESS,
                &[security_sub_function::SEND_KEY],
            );
        }

        state.attempts = state.attempts.saturating_add(1);
        if state.attempts >= self.max_attempts {
            warn!(
                attempts = state.attempts,
                lockout_secs = self.lockout.timeout().as_secs(),
                "Security access: attempts exhausted, locking out"
            );
            state.level = SecurityLevel::LockedOut;
            self.lockout.arm();
            return negative_response(
                service_id::SECURITY_ACCESS,
                NegativeResponseCode::ExceededNumberOfAttempts,
            );
        }

        info!(
            attempts = state.attempts,
            received = %hex::encode(key),
            "Security access: invalid key (NRC 0x35)"
        );
        state.level = SecurityLevel::Locked;
        negative_response(service_id::SECURITY_ACCESS, NegativeResponseCode::InvalidKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::ManualClock;

    fn service() -> (Arc<ManualClock>, SecurityAccessService) {
        let clock = Arc::new(ManualClock::new());
        let service = SecurityAccessService::new(&SecurityConfig::default(), clock.clone());
        (clock, service)
    }

    fn request_seed(service: &SecurityAccessService) -> Vec<u8> {
        let response = service.handle(&[0x27, 0x01]);
        assert_eq!(&response[..2], &[0x67, 0x01]);
        response[2..].to_vec()
    }

    fn send_key(service: &SecurityAccessService, key: &[u8]) -> Vec<u8> {
        let mut request = vec![0x27, 0x02];
        request.extend_from_slice(key);
        service.handle(&request)
    }

    #[test]
    fn test_compute_key() {
        assert_eq!(compute_key(&[0x00, 0x01, 0x80, 0xFF]), vec![0x00, 0xFF, 0x80, 0x01]);
    }

    #[test]
    fn test_unlock_with_correct_key() {
        let (_clock, service) = service();
        let seed = request_seed(&service);
        assert_eq!(seed.len(), 4);
        assert_eq!(service.level(), SecurityLevel::SeedIssued);

        assert_eq!(send_key(&service, &compute_key(&seed)), vec![0x67, 0x02]);
        assert!(service.is_unlocked());

        // The seed is spent
        assert_eq!(
            send_key(&service, &compute_key(&seed)),
            vec![0x7F, 0x27, 0x24]
        );
        assert!(service.is_unlocked());
    }

    #[test]
    fn test_zero_seed_when_unlocked() {
        let (_clock, service) = service();
        let seed = request_seed(&service);
        send_key(&service, &compute_key(&seed));

        assert_eq!(service.handle(&[0x27, 0x01]), vec![0x67, 0x01, 0, 0, 0, 0]);
        assert!(service.is_unlocked());
    }

    #[test]
    fn test_invalid_key_returns_to_locked() {
        let (_clock, service) = service();
        let seed = request_seed(&service);
        let mut key = compute_key(&seed);
        key[0] ^= 0xFF;

        assert_eq!(send_key(&service, &key), vec![0x7F, 0x27, 0x35]);
        assert_eq!(service.level(), SecurityLevel::Locked);
        assert_eq!(service.attempts(), 1);
    }

    #[test]
    fn test_lockout_and_recovery() {
        let (clock, service) = service();

        for _ in 0..2 {
            request_seed(&service);
            assert_eq!(send_key(&service, &[0, 0, 0, 1]), vec![0x7F, 0x27, 0x35]);
        }
        request_seed(&service);
        assert_eq!(send_key(&service, &[0, 0, 0, 1]), vec![0x7F, 0x27, 0x36]);
        assert_eq!(service.level(), SecurityLevel::LockedOut);

        clock.advance(Duration::from_secs(4));
        assert_eq!(service.handle(&[0x27, 0x01]), vec![0x7F, 0x27, 0x37]);
        assert!(!service.poll());

        clock.advance(Duration::from_secs(1));
        assert!(service.poll());
        assert_eq!(service.level(), SecurityLevel::Locked);
        assert_eq!(service.attempts(), 0);

        let seed = request_seed(&service);
        assert_eq!(send_key(&service, &compute_key(&seed)), vec![0x67, 0x02]);
    }

    #[test]
    fn test_lockout_expires_lazily_on_request() {
        let (clock, service) = service();
        for _ in 0..3 {
            request_seed(&service);
            send_key(&service, &[1, 2, 3, 4]);
        }
        clock.advance(Duration::from_secs(6));
        request_seed(&service);
        assert_eq!(service.level(), SecurityLevel::SeedIssued);
    }

    #[test]
    fn test_malformed_requests_leave_state() {
        let (_clock, service) = service();
        assert_eq!(service.handle(&[0x27]), vec![0x7F, 0x27, 0x13]);
        assert_eq!(service.handle(&[0x27, 0x05]), vec![0x7F, 0x27, 0x12]);
        assert_eq!(service.handle(&[0x27, 0x01, 0x00]), vec![0x7F, 0x27, 0x13]);
        assert_eq!(service.level(), SecurityLevel::Locked);

        request_seed(&service);
        assert_eq!(send_key(&service, &[1, 2]), vec![0x7F, 0x27, 0x13]);
        assert_eq!(service.level(), SecurityLevel::SeedIssued);
        assert_eq!(service.attempts(), 0);
    }

    #[test]
    fn test_relock() {
        let (_clock, service) = service();
        let seed = request_seed(&service);
        send_key(&service, &compute_key(&seed));
        service.relock();
        assert_eq!(service.level(), SecurityLevel::Locked);
    }

    #[test]
    fn test_relock_clears_wrong_key_count() {
        let (_clock, service) = service();
        for _ in 0..2 {
            request_seed(&service);
            send_key(&service, &[0, 0, 0, 1]);
        }
        request_seed(&service);
        service.relock();
        assert_eq!(service.level(), SecurityLevel::Locked);
        assert_eq!(service.attempts(), 0);

        // Two more wrong keys still fit under the limit
        request_seed(&service);
        assert_eq!(send_key(&service, &[0, 0, 0, 1]), vec![0x7F, 0x27, 0x35]);
        assert_eq!(service.attempts(), 1);
    }

    #[test]
    fn test_relock_keeps_running_lockout() {
        let (_clock, service) = service();
        for _ in 0..3 {
            request_seed(&service);
            send_key(&service, &[0, 0, 0, 1]);
        }
        service.relock();
        assert_eq!(service.level(), SecurityLevel::LockedOut);
        assert_eq!(service.handle(&[0x27, 0x01]), vec![0x7F, 0x27, 0x37]);
    }
}
