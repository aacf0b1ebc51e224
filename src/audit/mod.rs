//! Audit Logger (§4.5): typed, append-only events in six variants.
//! Validation happens at `emit` time; a failed validation is "a
//! programmer error, not a user error" (§4.5) — it is logged and the
//! event is dropped, never propagated as a command failure.

pub mod xml;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::error;

use crate::domain::CommandType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventKind {
    UserCommand,
    QuoteServer,
    AccountTransaction,
    SystemEvent,
    ErrorEvent,
    DebugEvent,
}

impl AuditEventKind {
    /// The XML child tag name for this variant (§6).
    pub fn tag(&self) -> &'static str {
        match self {
            AuditEventKind::UserCommand => "userCommand",
            AuditEventKind::QuoteServer => "quoteServer",
            AuditEventKind::AccountTransaction => "accountTransaction",
            AuditEventKind::SystemEvent => "systemEvent",
            AuditEventKind::ErrorEvent => "errorEvent",
            AuditEventKind::DebugEvent => "debugEvent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountAction {
    Add,
    Remove,
}

impl AccountAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountAction::Add => "add",
            AccountAction::Remove => "remove",
        }
    }
}

/// One audit record. All fields beyond `kind`/`server`/`timestamp`/
/// `transaction_num` are optional — which ones are populated depends
/// on the variant, mirroring the original source's kwargs-based
/// `Logging.log_*` calls (see `original_source/transaction_server/logging.py`).
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub server: String,
    pub timestamp: DateTime<Utc>,
    pub transaction_num: u64,
    pub command: Option<CommandType>,
    pub username: Option<String>,
    pub funds: Option<Decimal>,
    pub price: Option<Decimal>,
    pub stock_symbol: Option<String>,
    pub quote_server_time: Option<i64>,
    pub cryptokey: Option<String>,
    pub action: Option<AccountAction>,
    pub filename: Option<String>,
    pub error_message: Option<String>,
    pub debug_message: Option<String>,
}

impl AuditEvent {
    fn bare(kind: AuditEventKind, server: &str, transaction_num: u64) -> Self {
        Self {
            kind,
            server: server.to_string(),
            timestamp: Utc::now(),
            transaction_num,
            command: None,
            username: None,
            funds: None,
            price: None,
            stock_symbol: None,
            quote_server_time: None,
            cryptokey: None,
            action: None,
            filename: None,
            error_message: None,
            debug_message: None,
        }
    }

    pub fn user_command(server: &str, transaction_num: u64, command: CommandType, username: &str) -> Self {
        let mut e = Self::bare(AuditEventKind::UserCommand, server, transaction_num);
        e.command = Some(command);
        e.username = Some(username.to_string());
        e
    }

    pub fn quote_server(
        server: &str,
        transaction_num: u64,
        price: Decimal,
        stock_symbol: &str,
        username: &str,
        quote_server_time: i64,
        cryptokey: &str,
    ) -> Self {
        let mut e = Self::bare(AuditEventKind::QuoteServer, server, transaction_num);
        e.price = Some(price);
        e.stock_symbol = Some(stock_symbol.to_string());
        e.username = Some(username.to_string());
        e.quote_server_time = Some(quote_server_time);
        e.cryptokey = Some(cryptokey.to_string());
        e
    }

    pub fn account_transaction(server: &str, transaction_num: u64, action: AccountAction, username: &str, funds: Decimal) -> Self {
        let mut e = Self::bare(AuditEventKind::AccountTransaction, server, transaction_num);
        e.action = Some(action);
        e.username = Some(username.to_string());
        e.funds = Some(funds);
        e
    }

    pub fn system_event(server: &str, transaction_num: u64, command: CommandType) -> Self {
        let mut e = Self::bare(AuditEventKind::SystemEvent, server, transaction_num);
        e.command = Some(command);
        e
    }

    pub fn error_event(server: &str, transaction_num: u64, command: CommandType, error_message: &str) -> Self {
        let mut e = Self::bare(AuditEventKind::ErrorEvent, server, transaction_num);
        e.command = Some(command);
        e.error_message = Some(error_message.to_string());
        e
    }

    pub fn debug_event(server: &str, transaction_num: u64, command: CommandType, debug_message: &str) -> Self {
        let mut e = Self::bare(AuditEventKind::DebugEvent, server, transaction_num);
        e.command = Some(command);
        e.debug_message = Some(debug_message.to_string());
        e
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    pub fn with_stock_symbol(mut self, symbol: &str) -> Self {
        self.stock_symbol = Some(symbol.to_string());
        self
    }

    pub fn with_funds(mut self, funds: Decimal) -> Self {
        self.funds = Some(funds);
        self
    }

    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = Some(filename.to_string());
        self
    }

    fn validate(&self, max_skew: Duration) -> Result<(), String> {
        if self.transaction_num == 0 {
            return Err("transactionNum must be > 0".to_string());
        }
        if let Some(symbol) = &self.stock_symbol {
            if symbol.len() > 3 {
                return Err(format!("stockSymbol {symbol} exceeds 3 characters"));
            }
        }
        let skew = (Utc::now() - self.timestamp).abs();
        if skew > max_skew {
            return Err(format!("timestamp outside plausibility window (skew {skew})"));
        }
        Ok(())
    }
}

#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn emit(&self, event: AuditEvent);

    /// Events in chronological order, optionally filtered to one user.
    async fn snapshot(&self, username: Option<&str>) -> Vec<AuditEvent>;
}

pub struct InMemoryAuditLogger {
    events: Mutex<Vec<AuditEvent>>,
    max_clock_skew: Duration,
}

impl InMemoryAuditLogger {
    pub fn new(max_clock_skew: std::time::Duration) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            max_clock_skew: Duration::from_std(max_clock_skew).unwrap_or(Duration::seconds(300)),
        }
    }
}

#[async_trait]
impl AuditLogger for InMemoryAuditLogger {
    async fn emit(&self, event: AuditEvent) {
        if let Err(reason) = event.validate(self.max_clock_skew) {
            error!(kind = ?event.kind, reason, "dropping invalid audit event");
            return;
        }
        self.events.lock().push(event);
    }

    async fn snapshot(&self, username: Option<&str>) -> Vec<AuditEvent> {
        let mut events: Vec<AuditEvent> = self
            .events
            .lock()
            .iter()
            .filter(|e| match username {
                Some(u) => e.username.as_deref() == Some(u),
                None => true,
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        events
    }
}
