use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Side, Symbol};

/// A committed BUY or SELL, appended once a two-phase intent commits or
/// a trigger fires. Never mutated after insertion — §3's "transactions"
/// field is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub side: Side,
    pub symbol: Symbol,
    pub amount: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// One user's cash, holdings, reserves, and armed triggers.
///
/// Every mutator here enforces the §3 invariants it's responsible for:
/// cash and holdings never go negative, and a holding/reserve entry is
/// removed outright once it reaches zero rather than lingering at 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Account {
    pub cash_balance: Decimal,
    pub holdings: HashMap<Symbol, Decimal>,
    pub reserve_buy: HashMap<Symbol, Decimal>,
    pub reserve_sell: HashMap<Symbol, Decimal>,
    pub buy_triggers: HashMap<Symbol, Decimal>,
    /// `None` means half-armed: a reserve exists but no price has been set yet.
    pub sell_triggers: HashMap<Symbol, Option<Decimal>>,
    pub transactions: Vec<TransactionRecord>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AccountMutationError {
    #[error("insufficient cash balance")]
    InsufficientCash,
    #[error("insufficient holdings for {0}")]
    InsufficientHoldings(Symbol),
    #[error("insufficient reserve for {0}")]
    InsufficientReserve(Symbol),
}

impl Account {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit_cash(&mut self, amount: Decimal) {
        debug_assert!(amount >= Decimal::ZERO);
        self.cash_balance += amount;
    }

    pub fn debit_cash(&mut self, amount: Decimal) -> Result<(), AccountMutationError> {
        debug_assert!(amount >= Decimal::ZERO);
        if self.cash_balance < amount {
            return Err(AccountMutationError::InsufficientCash);
        }
        self.cash_balance -= amount;
        Ok(())
    }

    fn adjust_map(
        map: &mut HashMap<Symbol, Decimal>,
        symbol: &str,
        delta: Decimal,
        err: impl Fn() -> AccountMutationError,
    ) -> Result<(), AccountMutationError> {
        let current = map.get(symbol).copied().unwrap_or(Decimal::ZERO);
        let next = current + delta;
        if next < Decimal::ZERO {
            return Err(err());
        }
        if next.is_zero() {
            map.remove(symbol);
        } else {
            map.insert(symbol.to_string(), next);
        }
        Ok(())
    }

    pub fn inc_holding(&mut self, symbol: &str, delta: Decimal) -> Result<(), AccountMutationError> {
        Self::adjust_map(&mut self.holdings, symbol, delta, || {
            AccountMutationError::InsufficientHoldings(symbol.to_string())
        })
    }

    pub fn unset_holding(&mut self, symbol: &str) {
        self.holdings.remove(symbol);
    }

    pub fn inc_reserve_buy(&mut self, symbol: &str, delta: Decimal) -> Result<(), AccountMutationError> {
        Self::adjust_map(&mut self.reserve_buy, symbol, delta, || {
            AccountMutationError::InsufficientReserve(symbol.to_string())
        })
    }

    pub fn unset_reserve_buy(&mut self, symbol: &str) -> Decimal {
        self.reserve_buy.remove(symbol).unwrap_or(Decimal::ZERO)
    }

    pub fn inc_reserve_sell(&mut self, symbol: &str, delta: Decimal) -> Result<(), AccountMutationError> {
        Self::adjust_map(&mut self.reserve_sell, symbol, delta, || {
            AccountMutationError::InsufficientReserve(symbol.to_string())
        })
    }

    pub fn unset_reserve_sell(&mut self, symbol: &str) -> Decimal {
        self.reserve_sell.remove(symbol).unwrap_or(Decimal::ZERO)
    }

    pub fn set_buy_trigger(&mut self, symbol: &str, price: Decimal) {
        self.buy_triggers.insert(symbol.to_string(), price);
    }

    pub fn unset_buy_trigger(&mut self, symbol: &str) {
        self.buy_triggers.remove(symbol);
    }

    /// Half-armed: a reserve exists but the trigger price is not set yet.
    pub fn half_arm_sell_trigger(&mut self, symbol: &str) {
        self.sell_triggers.insert(symbol.to_string(), None);
    }

    pub fn arm_sell_trigger(&mut self, symbol: &str, price: Decimal) {
        self.sell_triggers.insert(symbol.to_string(), Some(price));
    }

    pub fn unset_sell_trigger(&mut self, symbol: &str) {
        self.sell_triggers.remove(symbol);
    }

    pub fn append_transaction(&mut self, record: TransactionRecord) {
        self.transactions.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn debit_rejects_negative_balance() {
        let mut acct = Account::new();
        acct.credit_cash(dec!(100));
        assert_eq!(acct.debit_cash(dec!(150)), Err(AccountMutationError::InsufficientCash));
        assert_eq!(acct.cash_balance, dec!(100));
    }

    #[test]
    fn holding_entry_drops_at_zero() {
        let mut acct = Account::new();
        acct.inc_holding("ABC", dec!(5)).unwrap();
        assert!(acct.holdings.contains_key("ABC"));
        acct.inc_holding("ABC", dec!(-5)).unwrap();
        assert!(!acct.holdings.contains_key("ABC"));
    }

    #[test]
    fn holding_cannot_go_negative() {
        let mut acct = Account::new();
        acct.inc_holding("ABC", dec!(2)).unwrap();
        assert!(acct.inc_holding("ABC", dec!(-5)).is_err());
        assert_eq!(acct.holdings.get("ABC").copied(), Some(dec!(2)));
    }
}
