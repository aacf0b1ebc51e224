//! Core domain types shared by every component: accounts, pending
//! intents, triggers, and the command/side enumerations that the audit
//! log and dispatcher both key off of.

pub mod account;
pub mod intent;
pub mod trigger;

pub use account::{Account, TransactionRecord};
pub use intent::PendingIntent;
pub use trigger::Trigger;

/// A user identifier. Kept as a plain `String` rather than a newtype —
/// every component treats it as an opaque map key.
pub type UserId = String;

/// A stock ticker. Audit events cap this at 3 characters (§6).
pub type Symbol = String;

/// Which side of a two-phase intent or a conditional trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// The fixed command enumeration from §6. `SET_SELL_AMOUNT` and
/// `SET_SELL_TRIGGER` are kept as distinct variants (Q5): some
/// revisions of the source collapsed these into one `CommandType`,
/// which this rewrite does not repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CommandType {
    Add,
    Quote,
    Buy,
    CommitBuy,
    CancelBuy,
    Sell,
    CommitSell,
    CancelSell,
    SetBuyAmount,
    CancelSetBuy,
    SetBuyTrigger,
    SetSellAmount,
    SetSellTrigger,
    CancelSetSell,
    Dumplog,
    DisplaySummary,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Add => "ADD",
            CommandType::Quote => "QUOTE",
            CommandType::Buy => "BUY",
            CommandType::CommitBuy => "COMMIT_BUY",
            CommandType::CancelBuy => "CANCEL_BUY",
            CommandType::Sell => "SELL",
            CommandType::CommitSell => "COMMIT_SELL",
            CommandType::CancelSell => "CANCEL_SELL",
            CommandType::SetBuyAmount => "SET_BUY_AMOUNT",
            CommandType::CancelSetBuy => "CANCEL_SET_BUY",
            CommandType::SetBuyTrigger => "SET_BUY_TRIGGER",
            CommandType::SetSellAmount => "SET_SELL_AMOUNT",
            CommandType::SetSellTrigger => "SET_SELL_TRIGGER",
            CommandType::CancelSetSell => "CANCEL_SET_SELL",
            CommandType::Dumplog => "DUMPLOG",
            CommandType::DisplaySummary => "DISPLAY_SUMMARY",
        }
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_sell_amount_and_trigger_are_distinct() {
        assert_ne!(
            CommandType::SetSellAmount.as_str(),
            CommandType::SetSellTrigger.as_str()
        );
    }

    #[test]
    fn side_display_matches_audit_vocabulary() {
        assert_eq!(Side::Buy.to_string(), "BUY");
        assert_eq!(Side::Sell.to_string(), "SELL");
    }
}
