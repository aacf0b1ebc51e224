//! Integration tests against the literal scenarios in §8 of the spec:
//! full command flows driven through `Engine::submit`, the same entry
//! point the ingress binary uses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use daytrader_engine::config::AppConfig;
use daytrader_engine::dispatch::{Command, ResponseStatus};
use daytrader_engine::Engine;
use rust_decimal_macros::dec;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A quote oracle stand-in: accepts connections forever, looks up the
/// requested symbol in a fixed table, and writes back its canned
/// response line. The username field in the response is never
/// inspected by the client, so every symbol gets one fixed line.
async fn spawn_mock_oracle(prices: HashMap<&'static str, &'static str>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let prices = Arc::new(prices);

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let prices = prices.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 256];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                if n == 0 {
                    return;
                }
                let request = String::from_utf8_lossy(&buf[..n]);
                let symbol = request.split_whitespace().next().unwrap_or("");
                if let Some(line) = prices.get(symbol) {
                    let _ = socket.write_all(line.as_bytes()).await;
                }
            });
        }
    });

    addr
}

fn base_config(oracle_addr: String) -> AppConfig {
    AppConfig { quote_oracle_addr: oracle_addr, ..AppConfig::default() }
}

#[tokio::test]
async fn s1_add_then_buy_then_commit_buy() {
    let addr = spawn_mock_oracle(HashMap::from([("ABC", "150.00,ABC,alice,1650000000000,k1\n")])).await;
    let engine = Engine::new(&base_config(addr));

    let add = engine.submit("alice", Command::Add { amount: dec!(10000) }).await;
    assert_eq!(add.status, ResponseStatus::Success);

    let buy = engine.submit("alice", Command::Buy { symbol: "ABC".to_string(), amount: dec!(450) }).await;
    assert_eq!(buy.status, ResponseStatus::Success);

    let commit = engine.submit("alice", Command::CommitBuy).await;
    assert_eq!(commit.status, ResponseStatus::Success);

    let account = engine.store().get_account("alice").await.unwrap();
    assert_eq!(account.cash_balance, dec!(9550));
    assert_eq!(account.holdings.get("ABC").copied(), Some(dec!(450)));
    assert_eq!(account.transactions.len(), 1);
}

#[tokio::test]
async fn s2_buy_expires_after_ttl() {
    let addr = spawn_mock_oracle(HashMap::from([("ABC", "150.00,ABC,alice,1650000000000,k1\n")])).await;
    let mut config = base_config(addr);
    config.pending_intent_ttl_secs = 1;
    let engine = Engine::new(&config);

    engine.submit("alice", Command::Add { amount: dec!(1000) }).await;
    engine.submit("alice", Command::Buy { symbol: "ABC".to_string(), amount: dec!(500) }).await;

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let commit = engine.submit("alice", Command::CommitBuy).await;
    assert_eq!(commit.status, ResponseStatus::Failure);

    let account = engine.store().get_account("alice").await.unwrap();
    assert_eq!(account.cash_balance, dec!(1000));
    assert!(account.holdings.is_empty());
}

#[tokio::test]
async fn s3_second_buy_replaces_the_first() {
    let addr = spawn_mock_oracle(HashMap::from([("ABC", "150.00,ABC,alice,1650000000000,k1\n")])).await;
    let engine = Engine::new(&base_config(addr));

    engine.submit("alice", Command::Add { amount: dec!(1000) }).await;
    engine.submit("alice", Command::Buy { symbol: "ABC".to_string(), amount: dec!(200) }).await;
    engine.submit("alice", Command::Buy { symbol: "ABC".to_string(), amount: dec!(400) }).await;

    let commit = engine.submit("alice", Command::CommitBuy).await;
    assert_eq!(commit.status, ResponseStatus::Success);

    let account = engine.store().get_account("alice").await.unwrap();
    assert_eq!(account.cash_balance, dec!(600));
    assert_eq!(account.holdings.get("ABC").copied(), Some(dec!(400)));
}

#[tokio::test]
async fn s4_sell_without_holdings_fails_and_stages_nothing() {
    let addr = spawn_mock_oracle(HashMap::from([("ABC", "150.00,ABC,alice,1650000000000,k1\n")])).await;
    let engine = Engine::new(&base_config(addr));

    engine.submit("alice", Command::Add { amount: dec!(1000) }).await;
    let sell = engine.submit("alice", Command::Sell { symbol: "ABC".to_string(), shares: dec!(1) }).await;
    assert_eq!(sell.status, ResponseStatus::Failure);

    let commit = engine.submit("alice", Command::CommitSell).await;
    assert_eq!(commit.status, ResponseStatus::Failure);
}

#[tokio::test]
async fn s5_buy_trigger_fires_with_residual_refund() {
    let addr = spawn_mock_oracle(HashMap::from([("XYZ", "99.00,XYZ,bob,1650000000000,k1\n")])).await;
    let engine = Engine::new(&base_config(addr));

    engine.submit("bob", Command::Add { amount: dec!(1000) }).await;
    engine.submit("bob", Command::SetBuyAmount { symbol: "XYZ".to_string(), amount: dec!(500) }).await;
    let armed = engine
        .submit("bob", Command::SetBuyTrigger { symbol: "XYZ".to_string(), price: dec!(100.00) })
        .await;
    assert_eq!(armed.status, ResponseStatus::Success);

    engine.run_trigger_loop_once().await;

    let account = engine.store().get_account("bob").await.unwrap();
    // floor(500/99) = 5 shares, cost 495, residual 5 refunded to cash.
    assert_eq!(account.holdings.get("XYZ").copied(), Some(dec!(5)));
    assert_eq!(account.cash_balance, dec!(505));
    assert!(account.reserve_buy.is_empty());
    assert!(account.buy_triggers.is_empty());
}

#[tokio::test]
async fn i5_cancel_set_buy_restores_prior_cash_balance() {
    let addr = spawn_mock_oracle(HashMap::new()).await;
    let engine = Engine::new(&base_config(addr));

    engine.submit("alice", Command::Add { amount: dec!(1000) }).await;
    let set = engine
        .submit("alice", Command::SetBuyAmount { symbol: "ABC".to_string(), amount: dec!(300) })
        .await;
    assert_eq!(set.status, ResponseStatus::Success);

    let account = engine.store().get_account("alice").await.unwrap();
    assert_eq!(account.cash_balance, dec!(700));
    assert_eq!(account.reserve_buy.get("ABC").copied(), Some(dec!(300)));

    let cancel = engine.submit("alice", Command::CancelSetBuy { symbol: "ABC".to_string() }).await;
    assert_eq!(cancel.status, ResponseStatus::Success);

    let account = engine.store().get_account("alice").await.unwrap();
    assert_eq!(account.cash_balance, dec!(1000));
    assert!(account.reserve_buy.is_empty());
    assert!(account.buy_triggers.is_empty());
}

#[tokio::test]
async fn i5_cancel_set_sell_before_trigger_armed_does_not_duplicate_holdings() {
    // SET_SELL_AMOUNT only reserves shares; it never removes them from
    // holdings. Cancelling a half-armed trigger must therefore leave
    // holdings untouched rather than crediting the reserve back in.
    let addr = spawn_mock_oracle(HashMap::new()).await;
    let engine = Engine::new(&base_config(addr));

    engine.submit("bob", Command::Add { amount: dec!(1000) }).await;
    engine.store().inc_holding("bob", "ABC", dec!(10)).await.unwrap();

    let set = engine
        .submit("bob", Command::SetSellAmount { symbol: "ABC".to_string(), shares: dec!(10) })
        .await;
    assert_eq!(set.status, ResponseStatus::Success);

    let account = engine.store().get_account("bob").await.unwrap();
    assert_eq!(account.holdings.get("ABC").copied(), Some(dec!(10)));
    assert_eq!(account.reserve_sell.get("ABC").copied(), Some(dec!(10)));

    let cancel = engine.submit("bob", Command::CancelSetSell { symbol: "ABC".to_string() }).await;
    assert_eq!(cancel.status, ResponseStatus::Success);

    let account = engine.store().get_account("bob").await.unwrap();
    // Must stay at 10, not jump to 20.
    assert_eq!(account.holdings.get("ABC").copied(), Some(dec!(10)));
    assert!(account.reserve_sell.is_empty());
    assert!(account.sell_triggers.is_empty());
}

#[tokio::test]
async fn i5_cancel_set_sell_after_trigger_armed_restores_holdings() {
    let addr = spawn_mock_oracle(HashMap::new()).await;
    let engine = Engine::new(&base_config(addr));

    engine.submit("carol", Command::Add { amount: dec!(1000) }).await;
    engine.store().inc_holding("carol", "ABC", dec!(10)).await.unwrap();

    engine.submit("carol", Command::SetSellAmount { symbol: "ABC".to_string(), shares: dec!(10) }).await;
    let armed = engine
        .submit("carol", Command::SetSellTrigger { symbol: "ABC".to_string(), price: dec!(50.00) })
        .await;
    assert_eq!(armed.status, ResponseStatus::Success);

    let account = engine.store().get_account("carol").await.unwrap();
    // SET_SELL_TRIGGER moves the reserved shares out of holdings.
    assert!(account.holdings.get("ABC").is_none());
    assert_eq!(account.reserve_sell.get("ABC").copied(), Some(dec!(10)));

    let cancel = engine.submit("carol", Command::CancelSetSell { symbol: "ABC".to_string() }).await;
    assert_eq!(cancel.status, ResponseStatus::Success);

    let account = engine.store().get_account("carol").await.unwrap();
    assert_eq!(account.holdings.get("ABC").copied(), Some(dec!(10)));
    assert!(account.reserve_sell.is_empty());
    assert!(account.sell_triggers.is_empty());
}

#[tokio::test]
async fn s6_dumplog_contains_every_event_kind_as_well_formed_xml() {
    let addr = spawn_mock_oracle(HashMap::from([("ABC", "150.00,ABC,carol,1650000000000,k1\n")])).await;
    let engine = Engine::new(&base_config(addr));

    // userCommand + debugEvent + accountTransaction.
    engine.submit("carol", Command::Add { amount: dec!(1000) }).await;
    // userCommand + debugEvent + quoteServer.
    engine.submit("carol", Command::Quote { symbol: "ABC".to_string() }).await;
    // errorEvent: insufficient cash.
    engine.submit("carol", Command::Buy { symbol: "ABC".to_string(), amount: dec!(999999) }).await;
    // systemEvent + userCommand.
    let dumplog = engine
        .submit("carol", Command::Dumplog { filename: "audit.xml".to_string(), username: None })
        .await;
    assert_eq!(dumplog.status, ResponseStatus::Success);

    let xml = dumplog.data.get("xml").and_then(|v| v.as_str()).unwrap();
    assert!(xml.starts_with("<log>\n"));
    for tag in ["userCommand", "quoteServer", "accountTransaction", "systemEvent", "errorEvent", "debugEvent"] {
        assert!(xml.contains(&format!("<{tag}>")), "dumplog missing <{tag}>: {xml}");
    }

    let filename = dumplog.data.get("filename").and_then(|v| v.as_str()).unwrap();
    assert!(filename.starts_with("audit-") && filename.ends_with(".xml"));
}
