use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Symbol;

/// An armed (or half-armed, SELL-only) conditional trigger, as held by
/// the Trigger Registry. `armed_price` is `None` only for a SELL
/// trigger between `SET_SELL_AMOUNT` and `SET_SELL_TRIGGER` — it can
/// never fire in that state (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub symbol: Symbol,
    pub armed_price: Option<Decimal>,
    /// Cash reserved, for a BUY trigger; shares reserved, for a SELL trigger.
    pub reserved: Decimal,
}
