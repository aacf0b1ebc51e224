//! Command Dispatcher (§4.1): the per-user serializer. Every command
//! is validated, routed onto a single-consumer queue keyed by userId,
//! and handled in arrival order for that user; different users run
//! fully in parallel (§5).

pub mod handlers;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::audit::AuditLogger;
use crate::audit::AuditEvent;
use crate::domain::{CommandType, UserId};
use crate::error::EngineError;
use crate::pending::InMemoryPendingIntents;
use crate::quote::QuoteClient;
use crate::store::AccountStore;
use crate::triggers::TriggerRegistry;

pub type HandlerData = serde_json::Map<String, Value>;

/// Inputs carried by every command kind (§4.1). Validation of
/// required/well-typed parameters happens before a `Command` is ever
/// constructed from the ingress layer's raw request, so by the time a
/// `Command` reaches the dispatcher it is well-formed; `validate`
/// below only checks the spec's semantic constraints (positivity,
/// stock symbol shape).
#[derive(Debug, Clone)]
pub enum Command {
    Add { amount: Decimal },
    Quote { symbol: String },
    Buy { symbol: String, amount: Decimal },
    CommitBuy,
    CancelBuy,
    Sell { symbol: String, shares: Decimal },
    CommitSell,
    CancelSell,
    SetBuyAmount { symbol: String, amount: Decimal },
    SetBuyTrigger { symbol: String, price: Decimal },
    CancelSetBuy { symbol: String },
    SetSellAmount { symbol: String, shares: Decimal },
    SetSellTrigger { symbol: String, price: Decimal },
    CancelSetSell { symbol: String },
    Dumplog { filename: String, username: Option<String> },
    DisplaySummary,
}

impl Command {
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Add { .. } => CommandType::Add,
            Command::Quote { .. } => CommandType::Quote,
            Command::Buy { .. } => CommandType::Buy,
            Command::CommitBuy => CommandType::CommitBuy,
            Command::CancelBuy => CommandType::CancelBuy,
            Command::Sell { .. } => CommandType::Sell,
            Command::CommitSell => CommandType::CommitSell,
            Command::CancelSell => CommandType::CancelSell,
            Command::SetBuyAmount { .. } => CommandType::SetBuyAmount,
            Command::SetBuyTrigger { .. } => CommandType::SetBuyTrigger,
            Command::CancelSetBuy { .. } => CommandType::CancelSetBuy,
            Command::SetSellAmount { .. } => CommandType::SetSellAmount,
            Command::SetSellTrigger { .. } => CommandType::SetSellTrigger,
            Command::CancelSetSell { .. } => CommandType::CancelSetSell,
            Command::Dumplog { .. } => CommandType::Dumplog,
            Command::DisplaySummary => CommandType::DisplaySummary,
        }
    }
}

fn is_valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty() && symbol.len() <= 3
}

/// Step 2 of §4.1: "Validates required parameters; on missing/ill-typed
/// parameters, emits errorEvent and returns a failure result. No state
/// is mutated." Parsing/type errors are caught by the ingress layer
/// before a `Command` exists; what's left here is the semantic shape
/// spec §6 calls out (positive amounts, ≤3-character symbols).
fn validate(command: &Command) -> Result<(), String> {
    match command {
        Command::Add { amount } if *amount <= Decimal::ZERO => Err("amount must be > 0".to_string()),
        Command::Buy { symbol, amount } | Command::SetBuyAmount { symbol, amount } => {
            if !is_valid_symbol(symbol) {
                Err(format!("invalid stock symbol {symbol}"))
            } else if *amount <= Decimal::ZERO {
                Err("amount must be > 0".to_string())
            } else {
                Ok(())
            }
        }
        Command::Sell { symbol, shares } | Command::SetSellAmount { symbol, shares } => {
            if !is_valid_symbol(symbol) {
                Err(format!("invalid stock symbol {symbol}"))
            } else if *shares <= Decimal::ZERO {
                Err("shares must be > 0".to_string())
            } else {
                Ok(())
            }
        }
        Command::SetBuyTrigger { symbol, price } | Command::SetSellTrigger { symbol, price } => {
            if !is_valid_symbol(symbol) {
                Err(format!("invalid stock symbol {symbol}"))
            } else if *price <= Decimal::ZERO {
                Err("price must be > 0".to_string())
            } else {
                Ok(())
            }
        }
        Command::Quote { symbol } | Command::CancelSetBuy { symbol } | Command::CancelSetSell { symbol } => {
            if is_valid_symbol(symbol) {
                Ok(())
            } else {
                Err(format!("invalid stock symbol {symbol}"))
            }
        }
        Command::Dumplog { filename, .. } if filename.is_empty() => Err("filename must not be empty".to_string()),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Failure,
}

/// §6: "Each command returns `{status, message?, ...command-specific
/// fields}`". `data` is flattened so command-specific fields sit
/// alongside `status`/`message` at the top level.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub data: HandlerData,
}

impl CommandResponse {
    fn success(data: HandlerData) -> Self {
        Self { status: ResponseStatus::Success, message: None, data }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self { status: ResponseStatus::Failure, message: Some(message.into()), data: HandlerData::new() }
    }

    /// For ingress-layer failures that never reach `Dispatcher::dispatch`
    /// at all — an unparseable request has no command type to tag a
    /// debugEvent/errorEvent with, so none is emitted.
    pub fn validation_failure(message: impl Into<String>) -> Self {
        Self::failure(message)
    }
}

/// Everything a command handler needs, shared across every per-user
/// worker task.
pub struct HandlerContext {
    pub store: Arc<dyn AccountStore>,
    pub pending: Arc<InMemoryPendingIntents>,
    pub triggers: Arc<dyn TriggerRegistry>,
    pub quotes: Arc<dyn QuoteClient>,
    pub audit: Arc<dyn AuditLogger>,
    pub tx_counter: Arc<AtomicU64>,
    pub server_name: String,
    pub pending_ttl: ChronoDuration,
}

impl HandlerContext {
    pub fn next_tx_num(&self) -> u64 {
        self.tx_counter.fetch_add(1, Ordering::SeqCst)
    }
}

struct Job {
    tx_num: u64,
    user: UserId,
    command: Command,
    reply: oneshot::Sender<CommandResponse>,
}

/// The per-user serializer (§5): one bounded `mpsc` queue and one
/// worker task per userId, created lazily on first contact.
pub struct Dispatcher {
    ctx: Arc<HandlerContext>,
    queues: DashMap<UserId, mpsc::Sender<Job>>,
    queue_depth: usize,
}

impl Dispatcher {
    pub fn new(ctx: Arc<HandlerContext>, queue_depth: usize) -> Self {
        Self { ctx, queues: DashMap::new(), queue_depth }
    }

    /// Runs the full §4.1 contract for one inbound command end to end:
    /// debugEvent at entry, parameter validation, per-user
    /// serialization, handler execution, and the success/failure
    /// audit event.
    pub async fn dispatch(&self, user: &str, command: Command) -> CommandResponse {
        let tx_num = self.ctx.next_tx_num();
        let command_type = command.command_type();

        self.ctx
            .audit
            .emit(AuditEvent::debug_event(
                &self.ctx.server_name,
                tx_num,
                command_type,
                &format!("entering {command_type} for user {user}"),
            ))
            .await;

        if let Err(reason) = validate(&command) {
            self.ctx
                .audit
                .emit(AuditEvent::error_event(&self.ctx.server_name, tx_num, command_type, &reason))
                .await;
            crate::metrics::record_command_processed(command_type.as_str(), "failure");
            return CommandResponse::failure(reason);
        }

        let sender = self.sender_for(user);
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job { tx_num, user: user.to_string(), command, reply: reply_tx };

        if sender.try_send(job).is_err() {
            let reason = format!("command queue for user {user} is full");
            warn!(user, tx_num, "command rejected: queue depth exceeded");
            self.ctx
                .audit
                .emit(AuditEvent::error_event(&self.ctx.server_name, tx_num, command_type, &reason))
                .await;
            return CommandResponse::failure(reason);
        }

        match reply_rx.await {
            Ok(response) => response,
            Err(_) => CommandResponse::failure("worker task terminated before replying"),
        }
    }

    fn sender_for(&self, user: &str) -> mpsc::Sender<Job> {
        self.queues
            .entry(user.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.queue_depth);
                tokio::spawn(worker_loop(self.ctx.clone(), rx));
                tx
            })
            .clone()
    }
}

/// One task per user. Commands are handled strictly in receive order,
/// which is arrival order since `dispatch` enqueues synchronously
/// before returning its future to the caller.
async fn worker_loop(ctx: Arc<HandlerContext>, mut rx: mpsc::Receiver<Job>) {
    while let Some(job) = rx.recv().await {
        let command_type = job.command.command_type();
        let outcome: Result<HandlerData, EngineError> =
            handlers::handle(&ctx, &job.user, job.tx_num, job.command).await;

        let response = match outcome {
            Ok(data) => {
                ctx.audit
                    .emit(AuditEvent::user_command(&ctx.server_name, job.tx_num, command_type, &job.user))
                    .await;
                crate::metrics::record_command_processed(command_type.as_str(), "success");
                CommandResponse::success(data)
            }
            Err(e) => {
                ctx.audit
                    .emit(AuditEvent::error_event(&ctx.server_name, job.tx_num, command_type, &e.to_string()))
                    .await;
                crate::metrics::record_command_processed(command_type.as_str(), "failure");
                CommandResponse::failure(e.to_string())
            }
        };

        let _ = job.reply.send(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rejects_non_positive_add_amount() {
        assert!(validate(&Command::Add { amount: dec!(0) }).is_err());
        assert!(validate(&Command::Add { amount: dec!(-5) }).is_err());
        assert!(validate(&Command::Add { amount: dec!(5) }).is_ok());
    }

    #[test]
    fn rejects_oversized_stock_symbol() {
        assert!(validate(&Command::Quote { symbol: "TOOLONG".to_string() }).is_err());
        assert!(validate(&Command::Quote { symbol: "ABC".to_string() }).is_ok());
    }

    #[test]
    fn rejects_empty_dumplog_filename() {
        assert!(validate(&Command::Dumplog { filename: String::new(), username: None }).is_err());
    }
}
