//! Day-trading transaction engine: per-user command serializer,
//! two-phase BUY/SELL, conditional price triggers, and an auditable
//! XML event log. See `SPEC_FULL.md` for the full component design.

pub mod audit;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod pending;
pub mod quote;
pub mod store;
pub mod triggers;

pub use engine::Engine;
pub use error::EngineError;
