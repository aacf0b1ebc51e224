//! Prometheus instrumentation, in the shape of the teacher's
//! `src/metrics/mod.rs`: metric names as constants, one `record_*`
//! function per call site, installed once at startup.

use metrics::counter;

pub mod names {
    pub const COMMANDS_PROCESSED_TOTAL: &str = "commands_processed_total";
    pub const TRIGGER_FIRES_TOTAL: &str = "trigger_fires_total";
    pub const QUOTE_CACHE_HITS_TOTAL: &str = "quote_cache_hits_total";
    pub const QUOTE_CACHE_MISSES_TOTAL: &str = "quote_cache_misses_total";
}

pub mod labels {
    pub const COMMAND: &str = "command";
    pub const STATUS: &str = "status";
    pub const SIDE: &str = "side";
    pub const SYMBOL: &str = "symbol";
}

/// One command finished dispatching, successfully or not (§4.1).
pub fn record_command_processed(command: &str, status: &str) {
    counter!(
        names::COMMANDS_PROCESSED_TOTAL,
        labels::COMMAND => command.to_string(),
        labels::STATUS => status.to_string()
    )
    .increment(1);
}

/// A conditional trigger fired (§4.3).
pub fn record_trigger_fire(side: &str, symbol: &str) {
    counter!(
        names::TRIGGER_FIRES_TOTAL,
        labels::SIDE => side.to_string(),
        labels::SYMBOL => symbol.to_string()
    )
    .increment(1);
}

/// A quote lookup was served from the Quote Client's cache or went to
/// the oracle (§4.4).
pub fn record_quote_cache_outcome(symbol: &str, hit: bool) {
    let name = if hit { names::QUOTE_CACHE_HITS_TOTAL } else { names::QUOTE_CACHE_MISSES_TOTAL };
    counter!(name, labels::SYMBOL => symbol.to_string()).increment(1);
}
