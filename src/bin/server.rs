//! Thin command-ingress binary (§1: "the HTTP command surface and its
//! URL shapes" are explicitly out of scope for the core). This exposes
//! one generic `POST /command` envelope endpoint plus `/health` and
//! `/metrics`, and otherwise just wires `Engine` into an axum router
//! the way the teacher's `main.rs` wires its own `AppState`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use daytrader_engine::config::AppConfig;
use daytrader_engine::dispatch::{Command, CommandResponse};
use daytrader_engine::Engine;
use metrics_exporter_prometheus::PrometheusBuilder;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

/// The generic command envelope (§6): one request shape for all ~15
/// command kinds, distinguished by `command`. Fields are optional
/// since which ones are required depends on the command; that check
/// happens in `to_command` below and in the dispatcher's own
/// validation pass.
#[derive(Debug, Deserialize)]
struct CommandRequest {
    #[serde(rename = "transactionNum")]
    #[allow(dead_code)]
    transaction_num: Option<u64>,
    command: String,
    #[serde(rename = "userId")]
    user_id: String,
    symbol: Option<String>,
    amount: Option<Decimal>,
    shares: Option<Decimal>,
    price: Option<Decimal>,
    filename: Option<String>,
    username: Option<String>,
}

fn to_command(req: &CommandRequest) -> Result<Command, String> {
    let need_symbol = || req.symbol.clone().ok_or_else(|| "missing symbol".to_string());
    let need_amount = || req.amount.ok_or_else(|| "missing amount".to_string());
    let need_shares = || req.shares.ok_or_else(|| "missing shares".to_string());
    let need_price = || req.price.ok_or_else(|| "missing price".to_string());

    Ok(match req.command.as_str() {
        "ADD" => Command::Add { amount: need_amount()? },
        "QUOTE" => Command::Quote { symbol: need_symbol()? },
        "BUY" => Command::Buy { symbol: need_symbol()?, amount: need_amount()? },
        "COMMIT_BUY" => Command::CommitBuy,
        "CANCEL_BUY" => Command::CancelBuy,
        "SELL" => Command::Sell { symbol: need_symbol()?, shares: need_shares()? },
        "COMMIT_SELL" => Command::CommitSell,
        "CANCEL_SELL" => Command::CancelSell,
        "SET_BUY_AMOUNT" => Command::SetBuyAmount { symbol: need_symbol()?, amount: need_amount()? },
        "SET_BUY_TRIGGER" => Command::SetBuyTrigger { symbol: need_symbol()?, price: need_price()? },
        "CANCEL_SET_BUY" => Command::CancelSetBuy { symbol: need_symbol()? },
        "SET_SELL_AMOUNT" => Command::SetSellAmount { symbol: need_symbol()?, shares: need_shares()? },
        "SET_SELL_TRIGGER" => Command::SetSellTrigger { symbol: need_symbol()?, price: need_price()? },
        "CANCEL_SET_SELL" => Command::CancelSetSell { symbol: need_symbol()? },
        "DUMPLOG" => Command::Dumplog { filename: req.filename.clone().ok_or("missing filename")?, username: req.username.clone() },
        "DISPLAY_SUMMARY" => Command::DisplaySummary,
        other => return Err(format!("unknown command {other}")),
    })
}

async fn handle_command(State(state): State<AppState>, Json(req): Json<CommandRequest>) -> Json<CommandResponse> {
    let user_id = req.user_id.clone();
    match to_command(&req) {
        Ok(command) => Json(state.engine.submit(&user_id, command).await),
        Err(message) => Json(CommandResponse::validation_failure(message)),
    }
}

async fn health() -> StatusCode {
    StatusCode::OK
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())))
        .json()
        .init();

    let config = AppConfig::load()?;
    info!(bind_addr = %config.bind_addr, environment = %config.environment, "starting daytrader-engine");

    let metrics_handle = PrometheusBuilder::new().install_recorder()?;

    let mut engine = Engine::new(&config);
    engine.start_background_tasks(&config);
    let engine = Arc::new(engine);
    let state = AppState { engine };

    let app = Router::new()
        .route("/command", post(handle_command))
        .route("/health", get(health))
        .route("/metrics", get(move || async move { metrics_handle.render() }))
        .with_state(state);

    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
