//! Wires every component together, analogous to the teacher's
//! `AppState`: one shared handle the ingress binary hands to every
//! request, owning the background Trigger Loop and Pending Intents
//! sweeper tasks.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tokio::task::JoinHandle;

use crate::audit::{AuditLogger, InMemoryAuditLogger};
use crate::config::AppConfig;
use crate::dispatch::{Command, CommandResponse, Dispatcher, HandlerContext};
use crate::pending::InMemoryPendingIntents;
use crate::quote::{QuoteClient, TcpQuoteClient};
use crate::store::{AccountStore, InMemoryAccountStore};
use crate::triggers::{InMemoryTriggerRegistry, TriggerLoop, TriggerRegistry};

pub struct Engine {
    dispatcher: Dispatcher,
    store: Arc<dyn AccountStore>,
    audit: Arc<dyn AuditLogger>,
    pending: Arc<InMemoryPendingIntents>,
    trigger_loop: Arc<TriggerLoop>,
    background: Vec<JoinHandle<()>>,
}

impl Engine {
    pub fn new(config: &AppConfig) -> Self {
        let server_name = hostname();

        let store: Arc<dyn AccountStore> = Arc::new(InMemoryAccountStore::new());
        let audit: Arc<dyn AuditLogger> = Arc::new(InMemoryAuditLogger::new(std::time::Duration::from_secs(
            config.audit_clock_skew_secs.max(0) as u64,
        )));
        let pending = Arc::new(InMemoryPendingIntents::new(config.pending_intent_ttl()));
        let triggers: Arc<dyn TriggerRegistry> = Arc::new(InMemoryTriggerRegistry::new());
        let quotes: Arc<dyn QuoteClient> = Arc::new(TcpQuoteClient::new(
            config.quote_oracle_addr.clone(),
            config.quote_connect_timeout(),
            config.quote_read_timeout(),
            config.quote_cache_ttl(),
        ));
        let tx_counter = Arc::new(AtomicU64::new(1));

        let ctx = Arc::new(HandlerContext {
            store: store.clone(),
            pending: pending.clone(),
            triggers: triggers.clone(),
            quotes: quotes.clone(),
            audit: audit.clone(),
            tx_counter: tx_counter.clone(),
            server_name: server_name.clone(),
            pending_ttl: ChronoDuration::seconds(config.pending_intent_ttl_secs as i64),
        });

        let dispatcher = Dispatcher::new(ctx, config.user_queue_depth);
        let trigger_loop = Arc::new(TriggerLoop::new(store.clone(), triggers, quotes, audit.clone(), tx_counter, server_name));

        Self { dispatcher, store, audit, pending, trigger_loop, background: Vec::new() }
    }

    /// Starts the Pending Intents sweeper and the Trigger Loop. Call
    /// once, after construction, from the ingress binary's startup
    /// path.
    pub fn start_background_tasks(&mut self, config: &AppConfig) {
        self.background.push(self.pending.clone().spawn_sweeper(config.pending_sweep_interval()));
        self.background.push(self.trigger_loop.clone().spawn(config.trigger_loop_interval()));
    }

    /// Signals the Trigger Loop to stop at its next wakeup (§5:
    /// "cancellable at graceful shutdown"). Does not join the tasks;
    /// callers that need that should hold onto `JoinHandle`s returned
    /// in a future revision or simply let the process exit.
    pub fn shutdown(&self) {
        self.trigger_loop.shutdown();
    }

    pub async fn submit(&self, user: &str, command: Command) -> CommandResponse {
        self.dispatcher.dispatch(user, command).await
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    pub fn audit(&self) -> &Arc<dyn AuditLogger> {
        &self.audit
    }

    /// Runs one Trigger Loop evaluation pass immediately instead of
    /// waiting for the background task's next tick. The production
    /// binary never calls this directly; it exists so tests can assert
    /// on trigger firing without sleeping through a real wakeup
    /// interval.
    pub async fn run_trigger_loop_once(&self) {
        self.trigger_loop.run_once().await;
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "daytrader-engine".to_string())
}
