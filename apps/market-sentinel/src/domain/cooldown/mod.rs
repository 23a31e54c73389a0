//! Cooldown Tracker
//!
//! Remembers the last emission time per `(rule, symbol, severity)` and
//! suppresses repeats inside the rule's cooldown.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::rules::{RuleKind, Severity};

/// Identity of one cooldown slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    rule: RuleKind,
    symbol: String,
    severity: Severity,
}

impl CooldownKey {
    /// Build a key.
    #[must_use]
    pub fn new(rule: RuleKind, symbol: impl Into<String>, severity: Severity) -> Self {
        Self {
            rule,
            symbol: symbol.into(),
            severity,
        }
    }
}

impl std::fmt::Display for CooldownKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.rule, self.symbol, self.severity)
    }
}

/// Last-trigger timestamps, one lock for the whole map.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    last: Mutex<HashMap<CooldownKey, i64>>,
}

impl CooldownTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass the gate and record `now`, or report suppression.
    ///
    /// A non-positive cooldown always passes and records nothing. A
    /// suppressed call leaves the stored timestamp untouched, and a stored
    /// timestamp never moves backwards.
    pub fn try_acquire(&self, key: CooldownKey, now_unix: i64, cooldown_sec: i64) -> bool {
        if cooldown_sec <= 0 {
            return true;
        }
        let mut last = self.last.lock();
        if let Some(&prev) = last.get(&key) {
            if now_unix - prev < cooldown_sec {
                return false;
            }
            last.insert(key, prev.max(now_unix));
        } else {
            last.insert(key, now_unix);
        }
        true
    }

    /// Last recorded trigger time for a key.
    #[must_use]
    pub fn last_trigger(&self, key: &CooldownKey) -> Option<i64> {
        self.last.lock().get(key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key() -> CooldownKey {
        CooldownKey::new(RuleKind::KeyBreakDown, "sh600000", Severity::Med)
    }

    #[test]
    fn suppresses_inside_cooldown() {
        let tracker = CooldownTracker::new();
        assert!(tracker.try_acquire(key(), 1_000, 600));
        assert!(!tracker.try_acquire(key(), 1_599, 600));
        assert_eq!(tracker.last_trigger(&key()), Some(1_000));
        assert!(tracker.try_acquire(key(), 1_600, 600));
        assert_eq!(tracker.last_trigger(&key()), Some(1_600));
    }

    #[test]
    fn severities_are_independent() {
        let tracker = CooldownTracker::new();
        let high = CooldownKey::new(RuleKind::KeyBreakDown, "sh600000", Severity::High);
        assert!(tracker.try_acquire(key(), 1_000, 600));
        assert!(tracker.try_acquire(high, 1_001, 600));
    }

    #[test]
    fn zero_cooldown_never_records() {
        let tracker = CooldownTracker::new();
        assert!(tracker.try_acquire(key(), 1_000, 0));
        assert!(tracker.try_acquire(key(), 1_000, 0));
        assert_eq!(tracker.last_trigger(&key()), None);
    }

    #[test]
    fn key_display() {
        assert_eq!(key().to_string(), "KEY_BREAK_DOWN:sh600000:med");
    }

    proptest! {
        #[test]
        fn timestamp_never_decreases(times in proptest::collection::vec(0i64..10_000, 1..50)) {
            let tracker = CooldownTracker::new();
            let mut prev = i64::MIN;
            for t in times {
                tracker.try_acquire(key(), t, 100);
                let current = tracker.last_trigger(&key()).unwrap();
                prop_assert!(current >= prev);
                prev = current;
            }
        }
    }
}
