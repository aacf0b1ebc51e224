use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::domain::account::{Account, TransactionRecord};
use crate::domain::UserId;

use super::{AccountStore, MutationResult, StoreError};

/// In-memory `AccountStore`: one mutex-guarded `Account` per user behind
/// a `DashMap`, mirroring the teacher's lock-free registries
/// (`services/matching/orderbook.rs`'s `order_index: DashMap<...>`)
/// while still giving each account its own short, synchronous critical
/// section for the handful of fields that must move together.
#[derive(Default)]
pub struct InMemoryAccountStore {
    accounts: DashMap<UserId, Mutex<Account>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_account<T>(
        &self,
        user: &str,
        f: impl FnOnce(&mut Account) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let entry = self
            .accounts
            .get(user)
            .ok_or_else(|| StoreError::NoSuchAccount(user.to_string()))?;
        let mut guard = entry.lock();
        f(&mut guard)
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn ensure_account(&self, user: &str) {
        self.accounts
            .entry(user.to_string())
            .or_insert_with(|| Mutex::new(Account::new()));
    }

    async fn get_account(&self, user: &str) -> Result<Account, StoreError> {
        self.accounts
            .get(user)
            .map(|entry| entry.lock().clone())
            .ok_or_else(|| StoreError::NoSuchAccount(user.to_string()))
    }

    async fn add_cash(&self, user: &str, delta: Decimal) -> Result<MutationResult, StoreError> {
        self.with_account(user, |acct| {
            if delta >= Decimal::ZERO {
                acct.credit_cash(delta);
            } else {
                acct.debit_cash(-delta)?;
            }
            Ok(MutationResult::ONE)
        })
    }

    async fn inc_holding(&self, user: &str, symbol: &str, delta: Decimal) -> Result<MutationResult, StoreError> {
        self.with_account(user, |acct| {
            acct.inc_holding(symbol, delta)?;
            Ok(MutationResult::ONE)
        })
    }

    async fn unset_holding(&self, user: &str, symbol: &str) -> Result<MutationResult, StoreError> {
        self.with_account(user, |acct| {
            acct.unset_holding(symbol);
            Ok(MutationResult::ONE)
        })
    }

    async fn inc_reserve_buy(&self, user: &str, symbol: &str, delta: Decimal) -> Result<MutationResult, StoreError> {
        self.with_account(user, |acct| {
            acct.inc_reserve_buy(symbol, delta)?;
            Ok(MutationResult::ONE)
        })
    }

    async fn take_reserve_buy(&self, user: &str, symbol: &str) -> Result<Decimal, StoreError> {
        self.with_account(user, |acct| {
            if !acct.reserve_buy.contains_key(symbol) {
                return Err(StoreError::NoSuchAccount(format!("{user}:{symbol} reserve_buy")));
            }
            Ok(acct.unset_reserve_buy(symbol))
        })
    }

    async fn inc_reserve_sell(&self, user: &str, symbol: &str, delta: Decimal) -> Result<MutationResult, StoreError> {
        self.with_account(user, |acct| {
            acct.inc_reserve_sell(symbol, delta)?;
            Ok(MutationResult::ONE)
        })
    }

    async fn take_reserve_sell(&self, user: &str, symbol: &str) -> Result<Decimal, StoreError> {
        self.with_account(user, |acct| {
            if !acct.reserve_sell.contains_key(symbol) {
                return Err(StoreError::NoSuchAccount(format!("{user}:{symbol} reserve_sell")));
            }
            Ok(acct.unset_reserve_sell(symbol))
        })
    }

    async fn set_buy_trigger(&self, user: &str, symbol: &str, price: Decimal) -> Result<MutationResult, StoreError> {
        self.with_account(user, |acct| {
            acct.set_buy_trigger(symbol, price);
            Ok(MutationResult::ONE)
        })
    }

    async fn unset_buy_trigger(&self, user: &str, symbol: &str) -> Result<MutationResult, StoreError> {
        self.with_account(user, |acct| {
            acct.unset_buy_trigger(symbol);
            Ok(MutationResult::ONE)
        })
    }

    async fn half_arm_sell_trigger(&self, user: &str, symbol: &str) -> Result<MutationResult, StoreError> {
        self.with_account(user, |acct| {
            acct.half_arm_sell_trigger(symbol);
            Ok(MutationResult::ONE)
        })
    }

    async fn arm_sell_trigger(&self, user: &str, symbol: &str, price: Decimal) -> Result<MutationResult, StoreError> {
        self.with_account(user, |acct| {
            acct.arm_sell_trigger(symbol, price);
            Ok(MutationResult::ONE)
        })
    }

    async fn unset_sell_trigger(&self, user: &str, symbol: &str) -> Result<MutationResult, StoreError> {
        self.with_account(user, |acct| {
            acct.unset_sell_trigger(symbol);
            Ok(MutationResult::ONE)
        })
    }

    async fn append_transaction(&self, user: &str, record: TransactionRecord) -> Result<MutationResult, StoreError> {
        self.with_account(user, |acct| {
            acct.append_transaction(record);
            Ok(MutationResult::ONE)
        })
    }

    async fn list_transactions(&self, user: &str) -> Vec<TransactionRecord> {
        self.accounts
            .get(user)
            .map(|entry| entry.lock().transactions.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn add_cash_requires_existing_account_unless_ensured() {
        let store = InMemoryAccountStore::new();
        assert!(store.add_cash("alice", dec!(10)).await.is_err());
        store.ensure_account("alice").await;
        assert!(store.add_cash("alice", dec!(10)).await.is_ok());
        assert_eq!(store.get_account("alice").await.unwrap().cash_balance, dec!(10));
    }

    #[tokio::test]
    async fn take_reserve_buy_fails_when_absent() {
        let store = InMemoryAccountStore::new();
        store.ensure_account("bob").await;
        assert!(store.take_reserve_buy("bob", "XYZ").await.is_err());
        store.inc_reserve_buy("bob", "XYZ", dec!(50)).await.unwrap();
        let refunded = store.take_reserve_buy("bob", "XYZ").await.unwrap();
        assert_eq!(refunded, dec!(50));
    }
}
