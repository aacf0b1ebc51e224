//! The Trigger Loop (§4.3): a single background task that wakes on a
//! fixed cadence, polls the Quote Client once per distinct armed
//! symbol, and fires any trigger whose condition now holds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audit::{AccountAction, AuditEvent, AuditLogger};
use crate::domain::account::TransactionRecord;
use crate::domain::{CommandType, Side};
use crate::quote::QuoteClient;
use crate::store::AccountStore;

use super::{ArmedTrigger, TriggerRegistry};

pub struct TriggerLoop {
    store: Arc<dyn AccountStore>,
    registry: Arc<dyn TriggerRegistry>,
    quotes: Arc<dyn QuoteClient>,
    audit: Arc<dyn AuditLogger>,
    tx_counter: Arc<AtomicU64>,
    server_name: String,
    shutdown: Notify,
}

impl TriggerLoop {
    pub fn new(
        store: Arc<dyn AccountStore>,
        registry: Arc<dyn TriggerRegistry>,
        quotes: Arc<dyn QuoteClient>,
        audit: Arc<dyn AuditLogger>,
        tx_counter: Arc<AtomicU64>,
        server_name: String,
    ) -> Self {
        Self { store, registry, quotes, audit, tx_counter, server_name, shutdown: Notify::new() }
    }

    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_once().await,
                    _ = self.shutdown.notified() => {
                        info!("trigger loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    fn next_tx_num(&self) -> u64 {
        self.tx_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// One evaluation pass. Public for tests that want to drive the
    /// loop deterministically instead of waiting on a real ticker.
    pub async fn run_once(&self) {
        let mut armed = self.registry.iterate_armed();
        // §4.3 fairness: deterministic (user, side, symbol) order.
        armed.sort_by(|a, b| (&a.user, a.side as u8, &a.symbol).cmp(&(&b.user, b.side as u8, &b.symbol)));

        let mut distinct_symbols: Vec<&str> = armed.iter().map(|t| t.symbol.as_str()).collect();
        distinct_symbols.sort_unstable();
        distinct_symbols.dedup();

        let mut prices: HashMap<String, Decimal> = HashMap::new();
        for symbol in distinct_symbols {
            let tx_num = self.next_tx_num();
            match self.quotes.get_quote(symbol, "trigger-loop", tx_num).await {
                Ok(quote) => {
                    prices.insert(symbol.to_string(), quote.price);
                }
                Err(e) => {
                    warn!(symbol, error = %e, "trigger loop quote lookup failed, skipping symbol this cycle");
                    self.audit
                        .emit(AuditEvent::error_event(&self.server_name, tx_num, CommandType::Quote, &e.to_string()))
                        .await;
                }
            }
        }

        for trigger in armed {
            let Some(&price) = prices.get(&trigger.symbol) else {
                continue; // quote lookup failed for this symbol this cycle
            };
            match trigger.side {
                Side::Buy => self.try_fire_buy(&trigger, price).await,
                Side::Sell => self.try_fire_sell(&trigger, price).await,
            }
        }
    }

    async fn try_fire_buy(&self, trigger: &ArmedTrigger, latest_price: Decimal) {
        if latest_price > trigger.armed_price {
            return;
        }
        if latest_price <= Decimal::ZERO {
            return;
        }

        // Re-check under the registry before mutating: "trigger
        // disappeared between iteration and firing" is a no-op (§5).
        let Some(reserved) = self.registry.clear_buy(&trigger.user, &trigger.symbol) else {
            return;
        };

        let shares = (reserved / latest_price).floor();
        let cash_spent = shares * latest_price;
        let residual = reserved - cash_spent;

        if let Err(e) = self.store.inc_holding(&trigger.user, &trigger.symbol, shares).await {
            warn!(user = %trigger.user, symbol = %trigger.symbol, error = %e, "buy trigger fire failed to credit holdings");
            return;
        }
        let _ = self.store.take_reserve_buy(&trigger.user, &trigger.symbol).await;
        let _ = self.store.unset_buy_trigger(&trigger.user, &trigger.symbol).await;
        if residual > Decimal::ZERO {
            let _ = self.store.add_cash(&trigger.user, residual).await;
        }

        let tx_num = self.next_tx_num();
        let _ = self
            .store
            .append_transaction(
                &trigger.user,
                TransactionRecord {
                    id: uuid::Uuid::new_v4(),
                    side: Side::Buy,
                    symbol: trigger.symbol.clone(),
                    amount: shares,
                    price: latest_price,
                    timestamp: chrono::Utc::now(),
                },
            )
            .await;

        let new_balance = self.store.get_account(&trigger.user).await.map(|a| a.cash_balance).unwrap_or_default();
        self.audit
            .emit(AuditEvent::system_event(&self.server_name, tx_num, CommandType::SetBuyTrigger))
            .await;
        self.audit
            .emit(AuditEvent::account_transaction(&self.server_name, tx_num, AccountAction::Add, &trigger.user, new_balance))
            .await;

        crate::metrics::record_trigger_fire("buy", &trigger.symbol);
        debug!(user = %trigger.user, symbol = %trigger.symbol, %shares, %residual, "buy trigger fired");
    }

    async fn try_fire_sell(&self, trigger: &ArmedTrigger, latest_price: Decimal) {
        if latest_price < trigger.armed_price {
            return;
        }

        let Some(reserved_shares) = self.registry.clear_sell(&trigger.user, &trigger.symbol) else {
            return;
        };

        let cash_received = reserved_shares * latest_price;
        if let Err(e) = self.store.add_cash(&trigger.user, cash_received).await {
            warn!(user = %trigger.user, symbol = %trigger.symbol, error = %e, "sell trigger fire failed to credit cash");
            return;
        }
        let _ = self.store.take_reserve_sell(&trigger.user, &trigger.symbol).await;
        let _ = self.store.unset_sell_trigger(&trigger.user, &trigger.symbol).await;

        let tx_num = self.next_tx_num();
        let _ = self
            .store
            .append_transaction(
                &trigger.user,
                TransactionRecord {
                    id: uuid::Uuid::new_v4(),
                    side: Side::Sell,
                    symbol: trigger.symbol.clone(),
                    amount: reserved_shares,
                    price: latest_price,
                    timestamp: chrono::Utc::now(),
                },
            )
            .await;

        let new_balance = self.store.get_account(&trigger.user).await.map(|a| a.cash_balance).unwrap_or_default();
        self.audit
            .emit(AuditEvent::system_event(&self.server_name, tx_num, CommandType::SetSellTrigger))
            .await;
        self.audit
            .emit(AuditEvent::account_transaction(&self.server_name, tx_num, AccountAction::Add, &trigger.user, new_balance))
            .await;

        crate::metrics::record_trigger_fire("sell", &trigger.symbol);
        debug!(user = %trigger.user, symbol = %trigger.symbol, %reserved_shares, %cash_received, "sell trigger fired");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLogger;
    use crate::quote::{QuoteError, QuoteResult};
    use crate::store::InMemoryAccountStore;
    use crate::triggers::InMemoryTriggerRegistry;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;

    struct FixedQuoteClient {
        price: StdMutex<HashMap<String, Decimal>>,
    }

    #[async_trait]
    impl QuoteClient for FixedQuoteClient {
        async fn get_quote(&self, symbol: &str, user: &str, _tx_num: u64) -> Result<QuoteResult, QuoteError> {
            let guard = self.price.lock().unwrap();
            let price = *guard.get(symbol).ok_or_else(|| QuoteError::Malformed("no price".into()))?;
            Ok(QuoteResult {
                price,
                symbol: symbol.to_string(),
                username: user.to_string(),
                oracle_timestamp_ms: 0,
                cryptokey: "k".to_string(),
                from_cache: false,
            })
        }
    }

    #[tokio::test]
    async fn buy_trigger_fires_and_refunds_residual() {
        let store: Arc<dyn AccountStore> = Arc::new(InMemoryAccountStore::new());
        store.ensure_account("bob").await;
        store.add_cash("bob", dec!(1000)).await.unwrap();
        store.add_cash("bob", dec!(-500)).await.unwrap(); // SET_BUY_AMOUNT debit
        store.inc_reserve_buy("bob", "XYZ", dec!(500)).await.unwrap();
        store.set_buy_trigger("bob", "XYZ", dec!(100.00)).await.unwrap();

        let registry: Arc<dyn TriggerRegistry> = Arc::new(InMemoryTriggerRegistry::new());
        registry.set_armed_buy("bob", "XYZ", dec!(100.00), dec!(500));

        let mut prices = HashMap::new();
        prices.insert("XYZ".to_string(), dec!(99.00));
        let quotes: Arc<dyn QuoteClient> = Arc::new(FixedQuoteClient { price: StdMutex::new(prices) });
        let audit: Arc<dyn AuditLogger> = Arc::new(InMemoryAuditLogger::new(Duration::from_secs(300)));

        let loop_ = TriggerLoop::new(store.clone(), registry.clone(), quotes, audit, Arc::new(AtomicU64::new(1)), "srv".into());
        loop_.run_once().await;

        let account = store.get_account("bob").await.unwrap();
        // floor(500/99) = 5 shares, cost 495, residual 5 refunded.
        assert_eq!(account.holdings.get("XYZ").copied(), Some(dec!(5)));
        assert_eq!(account.cash_balance, dec!(505));
        assert!(account.reserve_buy.is_empty());
        assert!(account.buy_triggers.is_empty());
        assert!(registry.iterate_armed().is_empty());
    }

    #[tokio::test]
    async fn sell_trigger_fires_without_returning_shares_to_holdings() {
        let store: Arc<dyn AccountStore> = Arc::new(InMemoryAccountStore::new());
        store.ensure_account("carol").await;
        store.inc_reserve_sell("carol", "ABC", dec!(10)).await.unwrap();

        let registry: Arc<dyn TriggerRegistry> = Arc::new(InMemoryTriggerRegistry::new());
        registry.set_half_armed_sell("carol", "ABC", dec!(10));
        registry.arm_sell("carol", "ABC", dec!(50.00));

        let mut prices = HashMap::new();
        prices.insert("ABC".to_string(), dec!(55.00));
        let quotes: Arc<dyn QuoteClient> = Arc::new(FixedQuoteClient { price: StdMutex::new(prices) });
        let audit: Arc<dyn AuditLogger> = Arc::new(InMemoryAuditLogger::new(Duration::from_secs(300)));

        let loop_ = TriggerLoop::new(store.clone(), registry.clone(), quotes, audit, Arc::new(AtomicU64::new(1)), "srv".into());
        loop_.run_once().await;

        let account = store.get_account("carol").await.unwrap();
        assert_eq!(account.cash_balance, dec!(550));
        assert!(account.holdings.is_empty());
        assert!(account.reserve_sell.is_empty());
    }

    #[tokio::test]
    async fn does_not_fire_when_condition_unmet() {
        let store: Arc<dyn AccountStore> = Arc::new(InMemoryAccountStore::new());
        store.ensure_account("dan").await;
        store.inc_reserve_buy("dan", "ABC", dec!(500)).await.unwrap();
        store.set_buy_trigger("dan", "ABC", dec!(50.00)).await.unwrap();

        let registry: Arc<dyn TriggerRegistry> = Arc::new(InMemoryTriggerRegistry::new());
        registry.set_armed_buy("dan", "ABC", dec!(50.00), dec!(500));

        let mut prices = HashMap::new();
        prices.insert("ABC".to_string(), dec!(60.00)); // above armed price, BUY should not fire
        let quotes: Arc<dyn QuoteClient> = Arc::new(FixedQuoteClient { price: StdMutex::new(prices) });
        let audit: Arc<dyn AuditLogger> = Arc::new(InMemoryAuditLogger::new(Duration::from_secs(300)));

        let loop_ = TriggerLoop::new(store.clone(), registry.clone(), quotes, audit, Arc::new(AtomicU64::new(1)), "srv".into());
        loop_.run_once().await;

        assert_eq!(registry.iterate_armed().len(), 1);
        assert!(store.get_account("dan").await.unwrap().holdings.is_empty());
    }
}
