//! Exchange abstraction used by the dashboard service.
//!
//! The live [`KrakenClient`](super::KrakenClient) and the in-memory
//! [`MockKrakenClient`](super::MockKrakenClient) both implement it, so the
//! aggregation and web layers can be exercised without the network.

use super::error::KrakenError;
use super::types::*;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::warn;

/// Authenticated Kraken Futures calls the dashboard needs.
#[async_trait]
pub trait FuturesApi: Send + Sync {
    /// Account log rows, newest first, paginated by `before`.
    async fn account_logs(
        &self,
        creds: &Credentials,
        query: &AccountLogQuery,
    ) -> Result<Vec<AccountLogEntry>, KrakenError>;

    /// Execution events in ascending time order.
    async fn execution_events(
        &self,
        creds: &Credentials,
        since_ms: i64,
        before_ms: i64,
    ) -> Result<Vec<ExecutionEvent>, KrakenError>;

    async fn open_positions(&self, creds: &Credentials) -> Result<Vec<OpenPosition>, KrakenError>;

    /// `None` when Kraken knows no ticker for the symbol.
    async fn ticker(&self, creds: &Credentials, symbol: &str) -> Result<Option<Ticker>, KrakenError>;

    async fn fee_schedules(&self, creds: &Credentials) -> Result<Vec<FeeSchedule>, KrakenError>;

    /// 30-day USD volume per fee schedule uid.
    async fn fee_volumes(&self, creds: &Credentials) -> Result<HashMap<String, Decimal>, KrakenError>;

    /// Upper bound on parallel requests issued by batch helpers.
    fn max_concurrency(&self) -> usize {
        5
    }

    /// Execution events normalized to [`Fill`]s (events without timestamp dropped).
    async fn fills(
        &self,
        creds: &Credentials,
        since_ms: i64,
        before_ms: i64,
    ) -> Result<Vec<Fill>, KrakenError> {
        let events = self.execution_events(creds, since_ms, before_ms).await?;
        Ok(events.iter().filter_map(ExecutionEvent::fill).collect())
    }

    /// Tickers for many symbols at once. Failed or unknown symbols are omitted.
    async fn batch_tickers(&self, creds: &Credentials, symbols: &[String]) -> HashMap<String, Ticker> {
        let results: Vec<(String, Result<Option<Ticker>, KrakenError>)> = stream::iter(symbols.iter().cloned())
            .map(|symbol| async move {
                let result = self.ticker(creds, &symbol).await;
                (symbol, result)
            })
            .buffer_unordered(self.max_concurrency().max(1))
            .collect()
            .await;

        let mut tickers = HashMap::with_capacity(results.len());
        for (symbol, result) in results {
            match result {
                Ok(Some(ticker)) => {
                    tickers.insert(symbol, ticker);
                }
                Ok(None) => warn!("No ticker data for {}", symbol),
                Err(e) => warn!("Failed to fetch ticker for {}: {}", symbol, e),
            }
        }
        tickers
    }
}
