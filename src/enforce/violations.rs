//! Policy violation log

use crate::automaton::{CallLabel, StateId};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use tracing::warn;

/// Identifier of a monitored subject (process or thread id)
pub type SubjectId = u64;

/// A rejected call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Subject that issued the call
    pub subject: SubjectId,
    /// State the subject was in
    pub state: StateId,
    /// Rejected call label
    pub label: CallLabel,
    /// When the call was rejected
    pub timestamp: SystemTime,
}

type Subscriber = Arc<dyn Fn(&Violation) + Send + Sync>;

/// Default number of violations kept before the oldest are dropped
pub const DEFAULT_LOG_LIMIT: usize = 10_000;

/// Shared log of violations with change subscribers.
///
/// Holds at most `limit` entries; recording past that drops the oldest.
pub struct ViolationLog {
    violations: Arc<Mutex<VecDeque<Violation>>>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    limit: usize,
}

impl ViolationLog {
    /// Create an empty log holding up to [`DEFAULT_LOG_LIMIT`] entries
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_LOG_LIMIT)
    }

    /// Create an empty log holding up to `limit` entries
    pub fn with_limit(limit: usize) -> Self {
        Self {
            violations: Arc::new(Mutex::new(VecDeque::new())),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            limit: limit.max(1),
        }
    }

    /// Record a violation and notify subscribers
    pub fn record(&self, violation: Violation) {
        warn!(
            subject = violation.subject,
            state = violation.state,
            label = violation.label,
            "Policy violation"
        );

        {
            let mut violations = lock(&self.violations);
            while violations.len() >= self.limit {
                violations.pop_front();
            }
            violations.push_back(violation.clone());
        }

        // Callbacks run unlocked so they may use the log themselves.
        let subscribers: Vec<Subscriber> = lock(&self.subscribers).clone();
        for subscriber in subscribers {
            subscriber(&violation);
        }
    }

    /// Subscribe to new violations
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&Violation) + Send + Sync + 'static,
    {
        lock(&self.subscribers).push(Arc::new(callback));
    }

    /// All recorded violations, oldest first
    pub fn violations(&self) -> Vec<Violation> {
        lock(&self.violations).iter().cloned().collect()
    }

    /// Violations issued by one subject
    pub fn for_subject(&self, subject: SubjectId) -> Vec<Violation> {
        lock(&self.violations)
            .iter()
            .filter(|v| v.subject == subject)
            .cloned()
            .collect()
    }

    /// Forget all violations
    pub fn clear(&self) {
        lock(&self.violations).clear();
    }

    /// Number of recorded violations
    pub fn count(&self) -> usize {
        lock(&self.violations).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Clone for ViolationLog {
    fn clone(&self) -> Self {
        Self {
            violations: Arc::clone(&self.violations),
            subscribers: Arc::clone(&self.subscribers),
            limit: self.limit,
        }
    }
}

impl Default for ViolationLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(subject: SubjectId, label: CallLabel) -> Violation {
        Violation {
            subject,
            state: 1,
            label,
            timestamp: SystemTime::now(),
        }
    }

    #[test]
    fn test_violation_log() {
        let log = ViolationLog::new();
        log.record(violation(7, 99));
        log.record(violation(8, 42));

        assert_eq!(log.count(), 2);
        assert_eq!(log.for_subject(7).len(), 1);
        assert_eq!(log.for_subject(7)[0].label, 99);

        log.clear();
        assert_eq!(log.count(), 0);
    }

    #[test]
    fn test_subscriber() {
        let log = ViolationLog::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        log.subscribe(move |v| {
            seen_clone.lock().unwrap().push(v.label);
        });

        log.clone().record(violation(1, 5));

        assert_eq!(*seen.lock().unwrap(), vec![5]);
        assert_eq!(log.count(), 1);
    }

    #[test]
    fn test_subscriber_can_use_log() {
        let log = ViolationLog::new();
        let inner = log.clone();
        log.subscribe(move |_| {
            inner.subscribe(|_| {});
            assert!(inner.count() > 0);
        });

        log.record(violation(1, 5));
        log.record(violation(1, 6));
        assert_eq!(lock(&log.subscribers).len(), 3);
    }

    #[test]
    fn test_limit_drops_oldest() {
        let log = ViolationLog::with_limit(2);
        for label in [1, 2, 3] {
            log.record(violation(4, label));
        }

        let labels: Vec<_> = log.violations().iter().map(|v| v.label).collect();
        assert_eq!(labels, vec![2, 3]);
    }
}
