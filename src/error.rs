//! The dispatcher-level error taxonomy from §7. Component errors
//! (`StoreError`, `QuoteError`, ...) convert into this via `#[from]` so a
//! command handler can just use `?`.

use thiserror::Error;

use crate::domain::account::AccountMutationError;
use crate::quote::QuoteError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or ill-typed parameter. Never mutates state.
    #[error("validation error: {0}")]
    Validation(String),

    /// Account missing, insufficient cash/holdings, no pending intent,
    /// expired intent, no armed trigger, no reserve. Never mutates state.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Quote oracle unreachable or returned a malformed response.
    #[error("upstream quote oracle error: {0}")]
    Upstream(String),

    /// A store mutation's matched/modified counts deviated from 1/1.
    /// Fatal for the command in flight; state already applied is not
    /// rolled back (Q3).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<AccountMutationError> for EngineError {
    fn from(e: AccountMutationError) -> Self {
        EngineError::Precondition(e.to_string())
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NoSuchAccount(_) => EngineError::Precondition(e.to_string()),
            StoreError::Mutation(inner) => EngineError::Precondition(inner.to_string()),
            StoreError::MatchMismatch { .. } => EngineError::Internal(e.to_string()),
        }
    }
}

impl From<QuoteError> for EngineError {
    fn from(e: QuoteError) -> Self {
        EngineError::Upstream(e.to_string())
    }
}
