//! Trigger Registry (§4.3): stores armed/half-armed BUY and SELL
//! triggers and lets the Trigger Loop take a consistent snapshot to
//! iterate without holding up command handlers.

pub mod trigger_loop;

use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::domain::{Side, Symbol, Trigger, UserId};

pub use trigger_loop::TriggerLoop;

/// One row the Trigger Loop evaluates: who, which side/symbol, the
/// armed price, and how much is reserved against it.
#[derive(Debug, Clone)]
pub struct ArmedTrigger {
    pub user: UserId,
    pub side: Side,
    pub symbol: Symbol,
    pub armed_price: Decimal,
    pub reserved: Decimal,
}

type TriggerKey = (UserId, Side, Symbol);

/// Sync — all operations are in-memory map manipulation, no I/O, so
/// there's no suspension point to make this `async` around.
pub trait TriggerRegistry: Send + Sync {
    fn set_armed_buy(&self, user: &str, symbol: &str, price: Decimal, reserved_cash: Decimal);
    fn set_half_armed_sell(&self, user: &str, symbol: &str, reserved_shares: Decimal);
    fn arm_sell(&self, user: &str, symbol: &str, price: Decimal);
    /// Removes the BUY trigger/reserve for `(user, symbol)`, returning
    /// the cash that had been reserved, if any.
    fn clear_buy(&self, user: &str, symbol: &str) -> Option<Decimal>;
    /// Removes the SELL trigger/reserve for `(user, symbol)`, returning
    /// the shares that had been reserved, if any.
    fn clear_sell(&self, user: &str, symbol: &str) -> Option<Decimal>;
    /// A consistent snapshot of every trigger with an armed price
    /// (half-armed SELLs are excluded — they can never fire),
    /// unordered; the Trigger Loop imposes the deterministic
    /// `(user, side, symbol)` evaluation order itself (§4.3 fairness).
    fn iterate_armed(&self) -> Vec<ArmedTrigger>;
}

#[derive(Default)]
pub struct InMemoryTriggerRegistry {
    triggers: DashMap<TriggerKey, Trigger>,
}

impl InMemoryTriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TriggerRegistry for InMemoryTriggerRegistry {
    fn set_armed_buy(&self, user: &str, symbol: &str, price: Decimal, reserved_cash: Decimal) {
        self.triggers.insert(
            (user.to_string(), Side::Buy, symbol.to_string()),
            Trigger { symbol: symbol.to_string(), armed_price: Some(price), reserved: reserved_cash },
        );
    }

    fn set_half_armed_sell(&self, user: &str, symbol: &str, reserved_shares: Decimal) {
        self.triggers.insert(
            (user.to_string(), Side::Sell, symbol.to_string()),
            Trigger { symbol: symbol.to_string(), armed_price: None, reserved: reserved_shares },
        );
    }

    fn arm_sell(&self, user: &str, symbol: &str, price: Decimal) {
        // Replace (Q4): re-arming after a trigger already exists overwrites it.
        let key = (user.to_string(), Side::Sell, symbol.to_string());
        let reserved = self.triggers.get(&key).map(|t| t.reserved).unwrap_or(Decimal::ZERO);
        self.triggers.insert(key, Trigger { symbol: symbol.to_string(), armed_price: Some(price), reserved });
    }

    fn clear_buy(&self, user: &str, symbol: &str) -> Option<Decimal> {
        self.triggers
            .remove(&(user.to_string(), Side::Buy, symbol.to_string()))
            .map(|(_, t)| t.reserved)
    }

    fn clear_sell(&self, user: &str, symbol: &str) -> Option<Decimal> {
        self.triggers
            .remove(&(user.to_string(), Side::Sell, symbol.to_string()))
            .map(|(_, t)| t.reserved)
    }

    fn iterate_armed(&self) -> Vec<ArmedTrigger> {
        self.triggers
            .iter()
            .filter_map(|entry| {
                let ((user, side, symbol), trigger) = (entry.key().clone(), entry.value());
                trigger.armed_price.map(|price| ArmedTrigger {
                    user,
                    side,
                    symbol,
                    armed_price: price,
                    reserved: trigger.reserved,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn half_armed_sell_is_excluded_from_armed_iteration() {
        let registry = InMemoryTriggerRegistry::new();
        registry.set_half_armed_sell("alice", "XYZ", dec!(10));
        assert!(registry.iterate_armed().is_empty());

        registry.arm_sell("alice", "XYZ", dec!(50));
        let armed = registry.iterate_armed();
        assert_eq!(armed.len(), 1);
        assert_eq!(armed[0].armed_price, dec!(50));
        assert_eq!(armed[0].reserved, dec!(10));
    }

    #[test]
    fn clear_buy_returns_reserved_cash_once() {
        let registry = InMemoryTriggerRegistry::new();
        registry.set_armed_buy("bob", "ABC", dec!(100), dec!(500));
        assert_eq!(registry.clear_buy("bob", "ABC"), Some(dec!(500)));
        assert_eq!(registry.clear_buy("bob", "ABC"), None);
    }
}
