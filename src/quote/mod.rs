//! Quote Client (§4.4): a line-based TCP client against the external
//! quote oracle, with a short-lived cache so a burst of `QUOTE`/`BUY`/
//! `SELL` commands for the same symbol doesn't hammer the oracle.
//!
//! Wire protocol (§6): request `"<SYMBOL> <USER>\n"`, response
//! `"<price>,<symbol>,<user>,<oracleTimestampMs>,<cryptokey>\n"`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum QuoteError {
    #[error("failed to connect to quote oracle at {0}: {1}")]
    Connect(String, std::io::Error),
    #[error("timed out connecting to quote oracle")]
    ConnectTimeout,
    #[error("timed out reading from quote oracle")]
    ReadTimeout,
    #[error("I/O error talking to quote oracle: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed quote oracle response: {0}")]
    Malformed(String),
}

/// Result of a quote lookup, with enough detail for the caller to know
/// whether it needs to emit a `quoteServer` audit event (only on a
/// cache miss, §4.4).
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteResult {
    pub price: Decimal,
    pub symbol: String,
    /// Echoes the *current* caller's username (supplemented behavior,
    /// SPEC_FULL §"Quote cache echoes the requesting username"), even
    /// when the price/timestamp/cryptokey came from the cache.
    pub username: String,
    pub oracle_timestamp_ms: i64,
    pub cryptokey: String,
    pub from_cache: bool,
}

#[derive(Debug, Clone)]
struct QuoteCacheEntry {
    price: Decimal,
    symbol: String,
    oracle_timestamp_ms: i64,
    cryptokey: String,
    fetched_at: Instant,
}

#[async_trait]
pub trait QuoteClient: Send + Sync {
    async fn get_quote(&self, symbol: &str, user: &str, tx_num: u64) -> Result<QuoteResult, QuoteError>;
}

pub struct TcpQuoteClient {
    oracle_addr: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    cache_ttl: Duration,
    cache: DashMap<String, QuoteCacheEntry>,
}

impl TcpQuoteClient {
    pub fn new(oracle_addr: String, connect_timeout: Duration, read_timeout: Duration, cache_ttl: Duration) -> Self {
        Self {
            oracle_addr,
            connect_timeout,
            read_timeout,
            cache_ttl,
            cache: DashMap::new(),
        }
    }

    fn cached(&self, symbol: &str) -> Option<QuoteCacheEntry> {
        let entry = self.cache.get(symbol)?;
        if entry.fetched_at.elapsed() < self.cache_ttl {
            Some(entry.clone())
        } else {
            None
        }
    }

    async fn fetch_from_oracle(&self, symbol: &str, user: &str) -> Result<QuoteCacheEntry, QuoteError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.oracle_addr))
            .await
            .map_err(|_| QuoteError::ConnectTimeout)?
            .map_err(|e| QuoteError::Connect(self.oracle_addr.clone(), e))?;

        let (read_half, mut write_half) = stream.into_split();
        let request = format!("{symbol} {user}\n");
        write_half.write_all(request.as_bytes()).await?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        tokio::time::timeout(self.read_timeout, reader.read_line(&mut line))
            .await
            .map_err(|_| QuoteError::ReadTimeout)??;

        parse_quote_line(line.trim_end_matches(['\n', '\r']))
    }
}

fn parse_quote_line(line: &str) -> Result<QuoteCacheEntry, QuoteError> {
    let fields: Vec<&str> = line.split(',').collect();
    let [price_str, symbol, _user, ts_str, cryptokey] = fields.as_slice() else {
        return Err(QuoteError::Malformed(line.to_string()));
    };

    let price: Decimal = price_str
        .parse()
        .map_err(|_| QuoteError::Malformed(format!("bad price {price_str}")))?;
    let oracle_timestamp_ms: i64 = ts_str
        .parse()
        .map_err(|_| QuoteError::Malformed(format!("bad timestamp {ts_str}")))?;

    Ok(QuoteCacheEntry {
        price,
        symbol: symbol.to_string(),
        oracle_timestamp_ms,
        cryptokey: cryptokey.to_string(),
        fetched_at: Instant::now(),
    })
}

#[async_trait]
impl QuoteClient for TcpQuoteClient {
    async fn get_quote(&self, symbol: &str, user: &str, tx_num: u64) -> Result<QuoteResult, QuoteError> {
        if let Some(entry) = self.cached(symbol) {
            debug!(symbol, tx_num, "quote cache hit");
            crate::metrics::record_quote_cache_outcome(symbol, true);
            return Ok(QuoteResult {
                price: entry.price,
                symbol: entry.symbol,
                username: user.to_string(),
                oracle_timestamp_ms: entry.oracle_timestamp_ms,
                cryptokey: entry.cryptokey,
                from_cache: true,
            });
        }

        debug!(symbol, tx_num, "quote cache miss, contacting oracle");
        crate::metrics::record_quote_cache_outcome(symbol, false);
        match self.fetch_from_oracle(symbol, user).await {
            Ok(entry) => {
                self.cache.insert(symbol.to_string(), entry.clone());
                Ok(QuoteResult {
                    price: entry.price,
                    symbol: entry.symbol,
                    username: user.to_string(),
                    oracle_timestamp_ms: entry.oracle_timestamp_ms,
                    cryptokey: entry.cryptokey,
                    from_cache: false,
                })
            }
            Err(e) => {
                warn!(symbol, tx_num, error = %e, "quote oracle lookup failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn spawn_mock_oracle(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn fetches_and_caches_a_quote() {
        let addr = spawn_mock_oracle("150.00,ABC,alice,1650000000000,k1\n").await;
        let client = TcpQuoteClient::new(addr, Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(60));

        let result = client.get_quote("ABC", "alice", 1).await.unwrap();
        assert_eq!(result.price, dec!(150.00));
        assert_eq!(result.symbol, "ABC");
        assert!(!result.from_cache);

        let cached = client.get_quote("ABC", "bob", 2).await.unwrap();
        assert!(cached.from_cache);
        // Cache hit still echoes the *current* caller.
        assert_eq!(cached.username, "bob");
        assert_eq!(cached.price, dec!(150.00));
    }

    #[test]
    fn parses_wire_format() {
        let entry = parse_quote_line("99.50,XYZ,bob,1650000000001,k2").unwrap();
        assert_eq!(entry.price, dec!(99.50));
        assert_eq!(entry.symbol, "XYZ");
        assert_eq!(entry.oracle_timestamp_ms, 1650000000001);
        assert_eq!(entry.cryptokey, "k2");
    }

    #[test]
    fn rejects_malformed_line() {
        assert!(parse_quote_line("not,enough,fields").is_err());
    }
}
