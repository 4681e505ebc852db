//! Purge Confirmation Gate
//!
//! A single-slot challenge/response state machine. The first purge request
//! issues a six digit code to the requesting admin; the same admin must echo
//! it back before the expiration elapses. While a challenge is live every
//! other admin is turned away.
//!
//! The gate holds no lock of its own. Callers serialise access (the
//! [`BulkAdministrator`](super::BulkAdministrator) keeps it behind a
//! `tokio::sync::Mutex` for the whole decide-and-run sequence).

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default challenge lifetime.
pub const DEFAULT_EXPIRATION: Duration = Duration::seconds(30);

/// Lowest issued code.
const CODE_MIN: u32 = 100_000;
/// Highest issued code.
const CODE_MAX: u32 = 999_999;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst))
            .single()
            .unwrap_or_default()
    }
}

/// A live challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirmation {
    pub executor: String,
    pub code: u32,
    pub issued_at: DateTime<Utc>,
}

/// Outcome of one [`ConfirmationGate::request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// A new challenge was issued to the caller.
    Issued { code: u32 },
    /// A code was supplied but nothing is pending.
    NoPurgePending,
    /// The pending challenge had expired and was discarded.
    Expired,
    /// Another admin holds the pending challenge.
    HeldBy { executor: String },
    /// The holder asked again without a code.
    CodeRequired,
    /// The holder supplied the wrong code.
    CodeMismatch,
    /// The holder supplied the right code. The gate is already idle again.
    Authorized,
}

/// Time-boxed, single-holder purge challenge.
#[derive(Debug)]
pub struct ConfirmationGate {
    pending: Option<PendingConfirmation>,
    expiration: Duration,
    rng: StdRng,
}

impl ConfirmationGate {
    /// Gate with an entropy-seeded code generator.
    #[must_use]
    pub fn new(expiration: Duration) -> Self {
        Self::with_rng(expiration, StdRng::from_entropy())
    }

    /// Gate with a caller-supplied code generator.
    #[must_use]
    pub const fn with_rng(expiration: Duration, rng: StdRng) -> Self {
        Self {
            pending: None,
            expiration,
            rng,
        }
    }

    #[must_use]
    pub const fn pending(&self) -> Option<&PendingConfirmation> {
        self.pending.as_ref()
    }

    #[must_use]
    pub const fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Advance the state machine for `actor` at `now`.
    ///
    /// Expiry is checked before anything else, so a stale challenge never
    /// blocks or authorizes anyone. On [`GateDecision::Authorized`] the gate
    /// is cleared before returning.
    pub fn request(
        &mut self,
        actor: &str,
        supplied_code: Option<u32>,
        now: DateTime<Utc>,
    ) -> GateDecision {
        let Some(pending) = &self.pending else {
            return match supplied_code {
                Some(_) => GateDecision::NoPurgePending,
                None => self.issue(actor, now),
            };
        };

        if now - pending.issued_at >= self.expiration {
            self.pending = None;
            return GateDecision::Expired;
        }

        if pending.executor != actor {
            return GateDecision::HeldBy {
                executor: pending.executor.clone(),
            };
        }

        match supplied_code {
            None => GateDecision::CodeRequired,
            Some(code) if code != pending.code => GateDecision::CodeMismatch,
            Some(_) => {
                self.pending = None;
                GateDecision::Authorized
            }
        }
    }

    fn issue(&mut self, actor: &str, now: DateTime<Utc>) -> GateDecision {
        let code = self.rng.gen_range(CODE_MIN..=CODE_MAX);
        self.pending = Some(PendingConfirmation {
            executor: actor.to_string(),
            code,
            issued_at: now,
        });
        GateDecision::Issued { code }
    }
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> ConfirmationGate {
        ConfirmationGate::with_rng(DEFAULT_EXPIRATION, StdRng::seed_from_u64(7))
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn issue(gate: &mut ConfirmationGate, actor: &str, ms: i64) -> u32 {
        match gate.request(actor, None, at(ms)) {
            GateDecision::Issued { code } => code,
            other => panic!("expected a code, got {other:?}"),
        }
    }

    #[test]
    fn test_codes_are_six_digits() {
        let mut gate = gate();
        for i in 0..200 {
            let code = issue(&mut gate, "alice", i * 1_000);
            assert!((CODE_MIN..=CODE_MAX).contains(&code), "code {code} out of range");
            assert_eq!(
                gate.request("alice", Some(code), at(i * 1_000 + 1)),
                GateDecision::Authorized
            );
        }
    }

    #[test]
    fn test_code_without_pending_is_rejected() {
        let mut gate = gate();
        assert_eq!(
            gate.request("alice", Some(123_456), at(0)),
            GateDecision::NoPurgePending
        );
        assert!(gate.pending().is_none());
    }

    #[test]
    fn test_other_admin_is_turned_away() {
        let mut gate = gate();
        let code = issue(&mut gate, "alice", 0);

        assert_eq!(
            gate.request("bob", Some(code), at(1_000)),
            GateDecision::HeldBy {
                executor: "alice".into()
            }
        );
        assert_eq!(
            gate.request("bob", None, at(1_000)),
            GateDecision::HeldBy {
                executor: "alice".into()
            }
        );
        assert_eq!(
            gate.pending(),
            Some(&PendingConfirmation {
                executor: "alice".into(),
                code,
                issued_at: at(0),
            })
        );
    }

    #[test]
    fn test_executor_compared_exactly() {
        let mut gate = gate();
        issue(&mut gate, "alice", 0);
        assert!(matches!(
            gate.request("Alice", None, at(10)),
            GateDecision::HeldBy { .. }
        ));
    }

    #[test]
    fn test_holder_without_code_is_reminded() {
        let mut gate = gate();
        issue(&mut gate, "alice", 0);
        assert_eq!(gate.request("alice", None, at(100)), GateDecision::CodeRequired);
        assert!(gate.pending().is_some());
    }

    #[test]
    fn test_wrong_code_keeps_challenge() {
        let mut gate = gate();
        let code = issue(&mut gate, "alice", 0);
        let wrong = if code == CODE_MAX { CODE_MIN } else { code + 1 };

        assert_eq!(
            gate.request("alice", Some(wrong), at(1_000)),
            GateDecision::CodeMismatch
        );
        assert_eq!(
            gate.request("alice", Some(code), at(2_000)),
            GateDecision::Authorized
        );
    }

    #[test]
    fn test_expires_at_exactly_thirty_seconds() {
        let mut gate = gate();
        let code = issue(&mut gate, "alice", 0);
        assert_eq!(
            gate.request("alice", Some(code), at(30_000)),
            GateDecision::Expired
        );
        assert!(gate.pending().is_none());
    }

    #[test]
    fn test_valid_just_before_expiry() {
        let mut gate = gate();
        let code = issue(&mut gate, "alice", 0);
        assert_eq!(
            gate.request("alice", Some(code), at(29_999)),
            GateDecision::Authorized
        );
    }

    #[test]
    fn test_expired_challenge_frees_gate_for_others() {
        let mut gate = gate();
        issue(&mut gate, "alice", 0);
        assert_eq!(gate.request("bob", None, at(31_000)), GateDecision::Expired);
        issue(&mut gate, "bob", 31_001);
        assert_eq!(gate.pending().map(|p| p.executor.as_str()), Some("bob"));
    }

    #[test]
    fn test_authorization_clears_gate() {
        let mut gate = gate();
        let code = issue(&mut gate, "alice", 0);
        assert_eq!(
            gate.request("alice", Some(code), at(5_000)),
            GateDecision::Authorized
        );
        assert!(gate.pending().is_none());
        assert_eq!(
            gate.request("alice", Some(code), at(5_001)),
            GateDecision::NoPurgePending
        );
    }

    #[test]
    fn test_issue_confirm_then_reissue() {
        let mut gate = gate();
        let first = issue(&mut gate, "alice", 0);
        assert_eq!(
            gate.request("alice", Some(first), at(5_000)),
            GateDecision::Authorized
        );

        issue(&mut gate, "alice", 6_000);
        let pending = gate.pending().unwrap();
        assert_eq!(pending.executor, "alice");
        assert_eq!(pending.issued_at, at(6_000));
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(at(0));
        clock.advance(Duration::milliseconds(30_000));
        assert_eq!(clock.now(), at(30_000));
    }

    #[test]
    fn test_custom_expiration() {
        let mut gate = ConfirmationGate::with_rng(Duration::seconds(5), StdRng::seed_from_u64(1));
        let code = issue(&mut gate, "alice", 0);
        assert_eq!(
            gate.request("alice", Some(code), at(5_000)),
            GateDecision::Expired
        );
    }
}
