//! Pending Intents (§4.2): short-lived staged BUY/SELL intents with a
//! 60s TTL, keyed by `(userId, side)`. Kept split from the Account
//! Store per the redesign note in §9 — this is the "fast, TTL-friendly
//! cache" half of the original source's pending-transactions /
//! document-store split.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::domain::{PendingIntent, Side, UserId};

pub struct InMemoryPendingIntents {
    entries: DashMap<(UserId, Side), PendingIntent>,
    ttl: Duration,
}

impl InMemoryPendingIntents {
    pub fn new(ttl: StdDuration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::from_std(ttl).unwrap_or(Duration::seconds(60)),
        }
    }

    /// Stages a new intent, silently replacing any existing one for
    /// this `(user, side)` — no resources are released on replace
    /// because none were held (§4.1).
    pub fn put(&self, user: &str, side: Side, symbol: String, amount: rust_decimal::Decimal, quoted_price: rust_decimal::Decimal) {
        self.entries.insert(
            (user.to_string(), side),
            PendingIntent::new(symbol, amount, quoted_price, Utc::now()),
        );
    }

    /// Returns the intent only if it exists and has not expired, even
    /// if the background sweeper has not yet caught up to it (§4.2c).
    pub fn get(&self, user: &str, side: Side) -> Option<PendingIntent> {
        let key = (user.to_string(), side);
        let entry = self.entries.get(&key)?;
        if entry.is_expired(Utc::now(), self.ttl) {
            return None;
        }
        Some(entry.clone())
    }

    pub fn delete(&self, user: &str, side: Side) {
        self.entries.remove(&(user.to_string(), side));
    }

    fn sweep_once(&self, now: DateTime<Utc>) {
        self.entries.retain(|_, intent| !intent.is_expired(now, self.ttl));
    }

    /// Spawns the background sweeper at the given cadence (§4.2b:
    /// "≤1s"). Returns the task handle so callers can abort it at
    /// shutdown.
    pub fn spawn_sweeper(self: Arc<Self>, interval: StdDuration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let before = self.entries.len();
                self.sweep_once(Utc::now());
                let swept = before - self.entries.len();
                if swept > 0 {
                    debug!(swept, "pending intents sweeper removed expired entries");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn get_hides_expired_entry_before_sweep_runs() {
        let store = InMemoryPendingIntents::new(StdDuration::from_secs(60));
        store.put("alice", Side::Buy, "ABC".to_string(), dec!(450), dec!(150.00));
        assert!(store.get("alice", Side::Buy).is_some());

        // Forge an expired entry directly to simulate 61s elapsed
        // without waiting on a real clock.
        store.entries.insert(
            ("alice".to_string(), Side::Buy),
            PendingIntent::new("ABC".to_string(), dec!(450), dec!(150.00), Utc::now() - Duration::seconds(61)),
        );
        assert!(store.get("alice", Side::Buy).is_none());
        // Sweeper has not run yet, but get() still hides it (§4.2c).
        assert_eq!(store.entries.len(), 1);
    }

    #[test]
    fn put_replaces_existing_intent() {
        let store = InMemoryPendingIntents::new(StdDuration::from_secs(60));
        store.put("alice", Side::Buy, "ABC".to_string(), dec!(200), dec!(150.00));
        store.put("alice", Side::Buy, "ABC".to_string(), dec!(400), dec!(150.00));
        assert_eq!(store.entries.len(), 1);
        assert_eq!(store.get("alice", Side::Buy).unwrap().amount, dec!(400));
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let store = InMemoryPendingIntents::new(StdDuration::from_secs(60));
        store.entries.insert(
            ("bob".to_string(), Side::Sell),
            PendingIntent::new("XYZ".to_string(), dec!(10), dec!(150.00), Utc::now() - Duration::seconds(120)),
        );
        store.sweep_once(Utc::now());
        assert!(store.entries.is_empty());
    }
}
