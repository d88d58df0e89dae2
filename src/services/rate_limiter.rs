//! Admission gate (fixed-window rate limiting)
//!
//! Counters live in the shared [`KeyValueStore`](crate::store::KeyValueStore)
//! under `ratelimit:<prefix>:<identity>`, so every server instance enforces
//! the same budget. Each call increments first and compares afterwards, so
//! rejected and failed requests still spend budget.
//!
//! A store outage fails open: the request is admitted and a warning logged.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::RateLimitRule;
use crate::store::DynKeyValueStore;

/// Outcome of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Requests left in the current window (0 once rejected)
    pub remaining: u32,
    /// When the current window ends
    pub reset_at: DateTime<Utc>,
}

/// Per-route, per-identity request limiter
pub struct AdmissionGate {
    store: DynKeyValueStore,
    enabled: bool,
}

impl AdmissionGate {
    /// `enabled = false` admits everything without touching the store
    pub fn new(store: DynKeyValueStore, enabled: bool) -> Self {
        Self { store, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Count one request from `identity` against `rule` and decide
    pub async fn check_and_increment(&self, identity: &str, rule: &RateLimitRule) -> Admission {
        if !self.enabled {
            return Self::open(rule);
        }

        let key = window_key(&rule.prefix, identity);
        let counter = match self.store.increment(&key, rule.window()).await {
            Ok(counter) => counter,
            Err(e) => {
                tracing::warn!(
                    "Rate limit store unavailable for '{}', admitting request: {:#}",
                    rule.prefix,
                    e
                );
                return Self::open(rule);
            }
        };

        let max = u64::from(rule.max);
        let allowed = counter.count <= max;
        let remaining = u32::try_from(max.saturating_sub(counter.count)).unwrap_or(rule.max);

        if !allowed {
            tracing::info!(
                "Rate limit exceeded for '{}' by {} ({} requests)",
                rule.prefix,
                identity,
                counter.count
            );
        }

        Admission {
            allowed,
            remaining,
            reset_at: reset_time(counter.ttl),
        }
    }

    fn open(rule: &RateLimitRule) -> Admission {
        Admission {
            allowed: true,
            remaining: rule.max,
            reset_at: reset_time(rule.window()),
        }
    }
}

fn window_key(prefix: &str, identity: &str) -> String {
    format!("ratelimit:{}:{}", prefix, identity)
}

fn reset_time(ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() + ttl
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::UnavailableStore;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn gate() -> AdmissionGate {
        AdmissionGate::new(Arc::new(MemoryStore::new()), true)
    }

    #[tokio::test]
    async fn test_budget_then_reject() {
        let gate = gate();
        let rule = RateLimitRule::new("otp", 900, 5, "Too many OTP requests");

        for expected_remaining in (0..5).rev() {
            let admission = gate.check_and_increment("10.0.0.1", &rule).await;
            assert!(admission.allowed);
            assert_eq!(admission.remaining, expected_remaining);
        }

        let sixth = gate.check_and_increment("10.0.0.1", &rule).await;
        assert!(!sixth.allowed);
        assert_eq!(sixth.remaining, 0);
        assert!(sixth.reset_at > Utc::now());
    }

    #[tokio::test]
    async fn test_identities_and_routes_are_independent() {
        let gate = gate();
        let login = RateLimitRule::new("login", 300, 1, "slow down");
        let signup = RateLimitRule::new("signup", 300, 1, "slow down");

        assert!(gate.check_and_increment("a", &login).await.allowed);
        assert!(!gate.check_and_increment("a", &login).await.allowed);

        assert!(gate.check_and_increment("b", &login).await.allowed);
        assert!(gate.check_and_increment("a", &signup).await.allowed);
    }

    #[tokio::test]
    async fn test_window_expiry_resets_budget() {
        let gate = gate();
        let rule = RateLimitRule {
            prefix: "fast".to_string(),
            window_seconds: 1,
            max: 2,
            message: "slow down".to_string(),
        };

        assert!(gate.check_and_increment("x", &rule).await.allowed);
        assert!(gate.check_and_increment("x", &rule).await.allowed);
        assert!(!gate.check_and_increment("x", &rule).await.allowed);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let fresh = gate.check_and_increment("x", &rule).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 1);
    }

    #[tokio::test]
    async fn test_remaining_never_increases_within_window() {
        let gate = gate();
        let rule = RateLimitRule::new("booking", 60, 3, "slow down");

        let mut last = u32::MAX;
        for _ in 0..6 {
            let admission = gate.check_and_increment("x", &rule).await;
            assert!(admission.remaining <= last);
            last = admission.remaining;
        }
        assert_eq!(last, 0);
    }

    #[tokio::test]
    async fn test_disabled_gate_admits_everything() {
        let gate = AdmissionGate::new(Arc::new(UnavailableStore), false);
        let rule = RateLimitRule::new("login", 300, 1, "slow down");

        for _ in 0..10 {
            let admission = gate.check_and_increment("x", &rule).await;
            assert!(admission.allowed);
            assert_eq!(admission.remaining, 1);
        }
    }

    #[tokio::test]
    async fn test_store_outage_fails_open() {
        let gate = AdmissionGate::new(Arc::new(UnavailableStore), true);
        let rule = RateLimitRule::new("login", 300, 1, "slow down");

        for _ in 0..3 {
            assert!(gate.check_and_increment("x", &rule).await.allowed);
        }
    }

    #[tokio::test]
    async fn test_concurrent_hits_share_one_budget() {
        let gate = Arc::new(gate());
        let rule = Arc::new(RateLimitRule::new("burst", 60, 10, "slow down"));

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let gate = gate.clone();
                let rule = rule.clone();
                tokio::spawn(async move { gate.check_and_increment("x", &rule).await.allowed })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }
}
