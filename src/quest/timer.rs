//! Quest Timers
//!
//! Arena of pending timers keyed by instance. The maintenance loop turns
//! due timers into `timer` world events.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::instance::InstanceKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTimer {
    pub timer_id: String,
    pub due_at: DateTime<Utc>,
}

/// A timer that ran out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueTimer {
    pub key: InstanceKey,
    pub timer_id: String,
    pub due_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct TimerArena {
    timers: DashMap<InstanceKey, Vec<PendingTimer>>,
}

impl TimerArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a timer. Restarting a running timer moves its deadline.
    pub fn schedule(&self, key: InstanceKey, timer_id: &str, delay: Duration, now: DateTime<Utc>) {
        let due_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut timers = self.timers.entry(key).or_default();
        timers.retain(|t| t.timer_id != timer_id);
        timers.push(PendingTimer {
            timer_id: timer_id.to_string(),
            due_at,
        });
    }

    /// Drop every timer of an instance
    pub fn cancel(&self, key: &InstanceKey) -> usize {
        self.timers.remove(key).map(|(_, t)| t.len()).unwrap_or(0)
    }

    /// Remove and return due timers, ordered by deadline then key
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<DueTimer> {
        let mut due = Vec::new();
        for mut entry in self.timers.iter_mut() {
            let key = entry.key().clone();
            entry.value_mut().retain(|t| {
                if t.due_at <= now {
                    due.push(DueTimer {
                        key: key.clone(),
                        timer_id: t.timer_id.clone(),
                        due_at: t.due_at,
                    });
                    false
                } else {
                    true
                }
            });
        }
        self.timers.retain(|_, timers| !timers.is_empty());
        due.sort_by(|a, b| {
            a.due_at
                .cmp(&b.due_at)
                .then_with(|| a.key.cmp(&b.key))
                .then_with(|| a.timer_id.cmp(&b.timer_id))
        });
        due
    }

    pub fn pending(&self, key: &InstanceKey) -> Vec<PendingTimer> {
        self.timers.get(key).map(|t| t.value().clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.timers.iter().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_replace_and_take_due() {
        let arena = TimerArena::new();
        let now = Utc::now();
        let key = InstanceKey::new("p1", "q");

        arena.schedule(key.clone(), "ambush", Duration::from_secs(5), now);
        arena.schedule(key.clone(), "ambush", Duration::from_secs(10), now);
        arena.schedule(key.clone(), "bell", Duration::from_secs(1), now);
        assert_eq!(arena.len(), 2);

        let due = arena.take_due(now + chrono::Duration::seconds(6));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].timer_id, "bell");

        let due = arena.take_due(now + chrono::Duration::seconds(10));
        assert_eq!(due[0].timer_id, "ambush");
        assert!(arena.is_empty());
    }

    #[test]
    fn test_cancel() {
        let arena = TimerArena::new();
        let key = InstanceKey::new("p1", "q");
        arena.schedule(key.clone(), "a", Duration::from_secs(1), Utc::now());
        assert_eq!(arena.cancel(&key), 1);
        assert!(arena.pending(&key).is_empty());
    }
}
