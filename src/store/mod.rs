//! The Account Store (§4.6): the only component that spans users, so it
//! is the one place atomicity actually matters across concurrent
//! command streams (triggers firing while another user's handler runs
//! is fine — accounts never touch each other — but a user's own
//! handler and a trigger firing for that same user must not interleave
//! their mutations of the same account).
//!
//! The trait is written against an abstract contract so a document- or
//! relational-store-backed implementation could satisfy it; the only
//! concrete implementation shipped here is in-memory (`memory.rs`),
//! per §1's explicit carve-out of storage choice.

pub mod memory;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::account::{Account, AccountMutationError, TransactionRecord};
use crate::domain::UserId;

pub use memory::InMemoryAccountStore;

/// Matched/modified document counts, mirroring the MongoDB-style update
/// result the original source's `db.py` exposed (and that `sqlx`'s
/// `PgQueryResult::rows_affected` plays the same role for). A command
/// handler asserts `matched == modified == 1` after every mutation;
/// any other value is an `InternalError` (§7) — the check is
/// implemented even though the in-memory store, being single-document
/// and mutex-guarded, cannot currently produce a mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationResult {
    pub matched: u64,
    pub modified: u64,
}

impl MutationResult {
    pub const ONE: MutationResult = MutationResult { matched: 1, modified: 1 };

    pub fn is_single_document_effect(&self) -> bool {
        self.matched == 1 && self.modified == 1
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no account for user {0}")]
    NoSuchAccount(UserId),
    #[error(transparent)]
    Mutation(#[from] AccountMutationError),
    #[error("store mutation affected {modified} documents, expected 1 (matched {matched})")]
    MatchMismatch { matched: u64, modified: u64 },
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Creates the account if absent. Idempotent. Used only by `ADD`
    /// (§4.1: "creates account if absent"); every other command treats
    /// a missing account as a `PreconditionError`.
    async fn ensure_account(&self, user: &str);

    async fn get_account(&self, user: &str) -> Result<Account, StoreError>;

    async fn add_cash(&self, user: &str, delta: Decimal) -> Result<MutationResult, StoreError>;

    async fn inc_holding(&self, user: &str, symbol: &str, delta: Decimal) -> Result<MutationResult, StoreError>;

    async fn unset_holding(&self, user: &str, symbol: &str) -> Result<MutationResult, StoreError>;

    async fn inc_reserve_buy(&self, user: &str, symbol: &str, delta: Decimal) -> Result<MutationResult, StoreError>;

    /// Removes the BUY reserve for `symbol` and returns the amount that
    /// had been set aside. Fails if no reserve exists.
    async fn take_reserve_buy(&self, user: &str, symbol: &str) -> Result<Decimal, StoreError>;

    async fn inc_reserve_sell(&self, user: &str, symbol: &str, delta: Decimal) -> Result<MutationResult, StoreError>;

    /// Removes the SELL reserve for `symbol` and returns the share
    /// count that had been set aside. Fails if no reserve exists.
    async fn take_reserve_sell(&self, user: &str, symbol: &str) -> Result<Decimal, StoreError>;

    async fn set_buy_trigger(&self, user: &str, symbol: &str, price: Decimal) -> Result<MutationResult, StoreError>;

    async fn unset_buy_trigger(&self, user: &str, symbol: &str) -> Result<MutationResult, StoreError>;

    /// Records a reserve with no armed price yet (half-armed SELL).
    async fn half_arm_sell_trigger(&self, user: &str, symbol: &str) -> Result<MutationResult, StoreError>;

    async fn arm_sell_trigger(&self, user: &str, symbol: &str, price: Decimal) -> Result<MutationResult, StoreError>;

    async fn unset_sell_trigger(&self, user: &str, symbol: &str) -> Result<MutationResult, StoreError>;

    async fn append_transaction(&self, user: &str, record: TransactionRecord) -> Result<MutationResult, StoreError>;

    async fn list_transactions(&self, user: &str) -> Vec<TransactionRecord>;
}
