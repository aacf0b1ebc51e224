//! Per-command handler bodies (§4.1). Each runs inside the issuing
//! user's worker task, so it is free to check a precondition and then
//! mutate state without another command for the same user racing it.
//!
//! Quote lookups always happen before any state mutation within a
//! handler (§7: "the design forbids" mutate-then-quote ordering), so
//! an upstream failure here never leaves a handler half-applied.

use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::audit::{AccountAction, AuditEvent};
use crate::domain::account::TransactionRecord;
use crate::domain::Side;
use crate::error::EngineError;

use super::{Command, HandlerContext, HandlerData};

pub(super) async fn handle(ctx: &HandlerContext, user: &str, tx_num: u64, command: Command) -> Result<HandlerData, EngineError> {
    match command {
        Command::Add { amount } => add(ctx, user, tx_num, amount).await,
        Command::Quote { symbol } => quote(ctx, user, tx_num, &symbol).await,
        Command::Buy { symbol, amount } => buy(ctx, user, tx_num, &symbol, amount).await,
        Command::CommitBuy => commit_buy(ctx, user, tx_num).await,
        Command::CancelBuy => cancel_buy(ctx, user).await,
        Command::Sell { symbol, shares } => sell(ctx, user, tx_num, &symbol, shares).await,
        Command::CommitSell => commit_sell(ctx, user, tx_num).await,
        Command::CancelSell => cancel_sell(ctx, user).await,
        Command::SetBuyAmount { symbol, amount } => set_buy_amount(ctx, user, &symbol, amount).await,
        Command::SetBuyTrigger { symbol, price } => set_buy_trigger(ctx, user, &symbol, price).await,
        Command::CancelSetBuy { symbol } => cancel_set_buy(ctx, user, tx_num, &symbol).await,
        Command::SetSellAmount { symbol, shares } => set_sell_amount(ctx, user, &symbol, shares).await,
        Command::SetSellTrigger { symbol, price } => set_sell_trigger(ctx, user, &symbol, price).await,
        Command::CancelSetSell { symbol } => cancel_set_sell(ctx, user, &symbol).await,
        Command::Dumplog { filename, username } => dumplog(ctx, tx_num, &filename, username.as_deref()).await,
        Command::DisplaySummary => display_summary(ctx, user, tx_num).await,
    }
}

async fn add(ctx: &HandlerContext, user: &str, tx_num: u64, amount: Decimal) -> Result<HandlerData, EngineError> {
    ctx.store.ensure_account(user).await;
    let result = ctx.store.add_cash(user, amount).await?;
    if !result.is_single_document_effect() {
        return Err(EngineError::Internal(format!("ADD affected {result:?}, expected 1/1")));
    }

    let account = ctx.store.get_account(user).await?;
    ctx.audit
        .emit(AuditEvent::account_transaction(&ctx.server_name, tx_num, AccountAction::Add, user, account.cash_balance))
        .await;

    let mut data = HandlerData::new();
    data.insert("cashBalance".into(), json!(account.cash_balance));
    Ok(data)
}

async fn quote(ctx: &HandlerContext, user: &str, tx_num: u64, symbol: &str) -> Result<HandlerData, EngineError> {
    let result = ctx.quotes.get_quote(symbol, user, tx_num).await?;
    if !result.from_cache {
        ctx.audit
            .emit(AuditEvent::quote_server(
                &ctx.server_name,
                tx_num,
                result.price,
                &result.symbol,
                &result.username,
                result.oracle_timestamp_ms,
                &result.cryptokey,
            ))
            .await;
    }

    let mut data = HandlerData::new();
    data.insert("price".into(), json!(result.price));
    data.insert("symbol".into(), json!(result.symbol));
    data.insert("username".into(), json!(result.username));
    data.insert("quoteServerTime".into(), json!(result.oracle_timestamp_ms));
    data.insert("cryptokey".into(), json!(result.cryptokey));
    Ok(data)
}

async fn buy(ctx: &HandlerContext, user: &str, tx_num: u64, symbol: &str, amount: Decimal) -> Result<HandlerData, EngineError> {
    let account = ctx.store.get_account(user).await?;
    if account.cash_balance < amount {
        return Err(EngineError::Precondition("insufficient cash balance".to_string()));
    }

    let quote = ctx.quotes.get_quote(symbol, user, tx_num).await?;
    if !quote.from_cache {
        ctx.audit
            .emit(AuditEvent::quote_server(&ctx.server_name, tx_num, quote.price, symbol, user, quote.oracle_timestamp_ms, &quote.cryptokey))
            .await;
    }

    // No balance change yet (§4.1): staging only replaces the pending intent.
    ctx.pending.put(user, Side::Buy, symbol.to_string(), amount, quote.price);

    let shares = (amount / quote.price).floor();
    let mut data = HandlerData::new();
    data.insert("symbol".into(), json!(symbol));
    data.insert("amount".into(), json!(amount));
    data.insert("price".into(), json!(quote.price));
    data.insert("shares".into(), json!(shares));
    Ok(data)
}

async fn commit_buy(ctx: &HandlerContext, user: &str, tx_num: u64) -> Result<HandlerData, EngineError> {
    let intent = ctx
        .pending
        .get(user, Side::Buy)
        .ok_or_else(|| EngineError::Precondition("no pending BUY, or it expired".to_string()))?;

    // Dollar amount, not share count (Q1): matches the literal S1/S3 scenarios.
    ctx.store.add_cash(user, -intent.amount).await?;
    let result = ctx.store.inc_holding(user, &intent.symbol, intent.amount).await?;
    if !result.is_single_document_effect() {
        return Err(EngineError::Internal(format!("COMMIT_BUY affected {result:?}, expected 1/1")));
    }
    ctx.pending.delete(user, Side::Buy);

    ctx.store
        .append_transaction(
            user,
            TransactionRecord {
                id: Uuid::new_v4(),
                side: Side::Buy,
                symbol: intent.symbol.clone(),
                amount: intent.amount,
                price: intent.quoted_price,
                timestamp: chrono::Utc::now(),
            },
        )
        .await?;

    let account = ctx.store.get_account(user).await?;
    ctx.audit
        .emit(AuditEvent::account_transaction(&ctx.server_name, tx_num, AccountAction::Remove, user, account.cash_balance))
        .await;

    let mut data = HandlerData::new();
    data.insert("symbol".into(), json!(intent.symbol));
    data.insert("amount".into(), json!(intent.amount));
    data.insert("cashBalance".into(), json!(account.cash_balance));
    Ok(data)
}

async fn cancel_buy(ctx: &HandlerContext, user: &str) -> Result<HandlerData, EngineError> {
    ctx.pending
        .get(user, Side::Buy)
        .ok_or_else(|| EngineError::Precondition("no pending BUY, or it expired".to_string()))?;
    ctx.pending.delete(user, Side::Buy);
    Ok(HandlerData::new())
}

async fn sell(ctx: &HandlerContext, user: &str, tx_num: u64, symbol: &str, shares: Decimal) -> Result<HandlerData, EngineError> {
    let account = ctx.store.get_account(user).await?;
    let held = account.holdings.get(symbol).copied().unwrap_or(Decimal::ZERO);
    if held < shares {
        return Err(EngineError::Precondition(format!("insufficient holdings of {symbol}")));
    }

    let quote = ctx.quotes.get_quote(symbol, user, tx_num).await?;
    if !quote.from_cache {
        ctx.audit
            .emit(AuditEvent::quote_server(&ctx.server_name, tx_num, quote.price, symbol, user, quote.oracle_timestamp_ms, &quote.cryptokey))
            .await;
    }

    // No holdings change yet (§4.1).
    ctx.pending.put(user, Side::Sell, symbol.to_string(), shares, quote.price);

    let mut data = HandlerData::new();
    data.insert("symbol".into(), json!(symbol));
    data.insert("shares".into(), json!(shares));
    data.insert("price".into(), json!(quote.price));
    Ok(data)
}

async fn commit_sell(ctx: &HandlerContext, user: &str, tx_num: u64) -> Result<HandlerData, EngineError> {
    let intent = ctx
        .pending
        .get(user, Side::Sell)
        .ok_or_else(|| EngineError::Precondition("no pending SELL, or it expired".to_string()))?;

    let result = ctx.store.inc_holding(user, &intent.symbol, -intent.amount).await?;
    if !result.is_single_document_effect() {
        return Err(EngineError::Internal(format!("COMMIT_SELL affected {result:?}, expected 1/1")));
    }
    let proceeds = intent.amount * intent.quoted_price;
    ctx.store.add_cash(user, proceeds).await?;
    ctx.pending.delete(user, Side::Sell);

    ctx.store
        .append_transaction(
            user,
            TransactionRecord {
                id: Uuid::new_v4(),
                side: Side::Sell,
                symbol: intent.symbol.clone(),
                amount: intent.amount,
                price: intent.quoted_price,
                timestamp: chrono::Utc::now(),
            },
        )
        .await?;

    let account = ctx.store.get_account(user).await?;
    ctx.audit
        .emit(AuditEvent::account_transaction(&ctx.server_name, tx_num, AccountAction::Add, user, account.cash_balance))
        .await;

    let mut data = HandlerData::new();
    data.insert("symbol".into(), json!(intent.symbol));
    data.insert("shares".into(), json!(intent.amount));
    data.insert("cashBalance".into(), json!(account.cash_balance));
    Ok(data)
}

async fn cancel_sell(ctx: &HandlerContext, user: &str) -> Result<HandlerData, EngineError> {
    ctx.pending
        .get(user, Side::Sell)
        .ok_or_else(|| EngineError::Precondition("no pending SELL, or it expired".to_string()))?;
    ctx.pending.delete(user, Side::Sell);
    Ok(HandlerData::new())
}

async fn set_buy_amount(ctx: &HandlerContext, user: &str, symbol: &str, amount: Decimal) -> Result<HandlerData, EngineError> {
    let account = ctx.store.get_account(user).await?;
    if account.cash_balance < amount {
        return Err(EngineError::Precondition("insufficient cash balance".to_string()));
    }

    ctx.store.add_cash(user, -amount).await?;
    ctx.store.inc_reserve_buy(user, symbol, amount).await?;

    let mut data = HandlerData::new();
    data.insert("symbol".into(), json!(symbol));
    data.insert("reserved".into(), json!(amount));
    Ok(data)
}

async fn set_buy_trigger(ctx: &HandlerContext, user: &str, symbol: &str, price: Decimal) -> Result<HandlerData, EngineError> {
    let account = ctx.store.get_account(user).await?;
    let reserved = *account
        .reserve_buy
        .get(symbol)
        .ok_or_else(|| EngineError::Precondition(format!("no BUY reserve for {symbol}")))?;

    ctx.store.set_buy_trigger(user, symbol, price).await?;
    ctx.triggers.set_armed_buy(user, symbol, price, reserved);

    let mut data = HandlerData::new();
    data.insert("symbol".into(), json!(symbol));
    data.insert("armedPrice".into(), json!(price));
    Ok(data)
}

async fn cancel_set_buy(ctx: &HandlerContext, user: &str, tx_num: u64, symbol: &str) -> Result<HandlerData, EngineError> {
    let refunded = ctx.store.take_reserve_buy(user, symbol).await?;
    ctx.store.unset_buy_trigger(user, symbol).await?;
    ctx.triggers.clear_buy(user, symbol);
    ctx.store.add_cash(user, refunded).await?;

    let account = ctx.store.get_account(user).await?;
    ctx.audit
        .emit(AuditEvent::account_transaction(&ctx.server_name, tx_num, AccountAction::Add, user, account.cash_balance))
        .await;

    let mut data = HandlerData::new();
    data.insert("symbol".into(), json!(symbol));
    data.insert("refunded".into(), json!(refunded));
    Ok(data)
}

async fn set_sell_amount(ctx: &HandlerContext, user: &str, symbol: &str, shares: Decimal) -> Result<HandlerData, EngineError> {
    let account = ctx.store.get_account(user).await?;
    let held = account.holdings.get(symbol).copied().unwrap_or(Decimal::ZERO);
    if held < shares {
        return Err(EngineError::Precondition(format!("insufficient holdings of {symbol}")));
    }

    // reserveSell[symbol] is set now, but the shares stay in holdings
    // until SET_SELL_TRIGGER actually arms the trigger (§4.1, §9) —
    // counted in both places until then, by design.
    ctx.store.inc_reserve_sell(user, symbol, shares).await?;
    ctx.store.half_arm_sell_trigger(user, symbol).await?;
    ctx.triggers.set_half_armed_sell(user, symbol, shares);

    let mut data = HandlerData::new();
    data.insert("symbol".into(), json!(symbol));
    data.insert("shares".into(), json!(shares));
    Ok(data)
}

async fn set_sell_trigger(ctx: &HandlerContext, user: &str, symbol: &str, price: Decimal) -> Result<HandlerData, EngineError> {
    let account = ctx.store.get_account(user).await?;
    let is_half_armed = matches!(account.sell_triggers.get(symbol), Some(None));
    if !is_half_armed {
        return Err(EngineError::Precondition(format!("no half-armed SELL trigger for {symbol}")));
    }

    let reserved_shares = account.reserve_sell.get(symbol).copied().unwrap_or(Decimal::ZERO);
    if reserved_shares > Decimal::ZERO {
        ctx.store.inc_holding(user, symbol, -reserved_shares).await?;
    }
    ctx.store.arm_sell_trigger(user, symbol, price).await?;
    ctx.triggers.arm_sell(user, symbol, price);

    let mut data = HandlerData::new();
    data.insert("symbol".into(), json!(symbol));
    data.insert("armedPrice".into(), json!(price));
    Ok(data)
}

async fn cancel_set_sell(ctx: &HandlerContext, user: &str, symbol: &str) -> Result<HandlerData, EngineError> {
    let account = ctx.store.get_account(user).await?;
    // Shares only ever left `holdings` once SET_SELL_TRIGGER armed the
    // trigger (handlers.rs::set_sell_trigger); a half-armed trigger
    // (SET_SELL_AMOUNT only, armed_price still unset) never touched
    // holdings, so cancelling it must not credit shares back (§8 I5).
    let was_armed = matches!(account.sell_triggers.get(symbol), Some(Some(_)));

    let returned = ctx.store.take_reserve_sell(user, symbol).await?;
    ctx.store.unset_sell_trigger(user, symbol).await?;
    ctx.triggers.clear_sell(user, symbol);
    if was_armed && returned > Decimal::ZERO {
        ctx.store.inc_holding(user, symbol, returned).await?;
    }

    let mut data = HandlerData::new();
    data.insert("symbol".into(), json!(symbol));
    data.insert("returnedShares".into(), json!(if was_armed { returned } else { Decimal::ZERO }));
    Ok(data)
}

async fn dumplog(ctx: &HandlerContext, tx_num: u64, filename: &str, username: Option<&str>) -> Result<HandlerData, EngineError> {
    let events = ctx.audit.snapshot(username).await;
    let xml = crate::audit::xml::render_dumplog(&events);
    let suffixed = crate::audit::xml::suffixed_filename(filename, chrono::Utc::now());

    ctx.audit
        .emit(AuditEvent::system_event(&ctx.server_name, tx_num, crate::domain::CommandType::Dumplog))
        .await;

    let mut data = HandlerData::new();
    data.insert("filename".into(), json!(suffixed));
    data.insert("eventCount".into(), json!(events.len()));
    data.insert("xml".into(), json!(xml));
    Ok(data)
}

async fn display_summary(ctx: &HandlerContext, user: &str, tx_num: u64) -> Result<HandlerData, EngineError> {
    let account = ctx.store.get_account(user).await?;
    let transactions = ctx.store.list_transactions(user).await;

    ctx.audit
        .emit(AuditEvent::system_event(&ctx.server_name, tx_num, crate::domain::CommandType::DisplaySummary))
        .await;

    let mut data = HandlerData::new();
    data.insert("cashBalance".into(), json!(account.cash_balance));
    data.insert("holdings".into(), json!(account.holdings));
    data.insert("reserveBuy".into(), json!(account.reserve_buy));
    data.insert("reserveSell".into(), json!(account.reserve_sell));
    data.insert("buyTriggers".into(), json!(account.buy_triggers));
    data.insert("sellTriggers".into(), json!(account.sell_triggers));
    data.insert("transactions".into(), json!(transactions));
    Ok(data)
}
