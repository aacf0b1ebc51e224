use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Symbol;

/// A staged BUY or SELL awaiting COMMIT/CANCEL within the 60s window.
/// For BUY, `amount` is the target dollar spend; for SELL it's the
/// share count (§3). `quoted_price` is the price seen when the intent
/// was staged — not part of the spec's PendingIntent field list, but
/// needed to compute `sharesToBuy` at BUY time and to record on the
/// eventual transaction without re-quoting at commit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingIntent {
    pub symbol: Symbol,
    pub amount: Decimal,
    pub quoted_price: Decimal,
    pub created_at: DateTime<Utc>,
}

impl PendingIntent {
    pub fn new(symbol: Symbol, amount: Decimal, quoted_price: Decimal, created_at: DateTime<Utc>) -> Self {
        Self { symbol, amount, quoted_price, created_at }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now > self.created_at + ttl
    }
}
