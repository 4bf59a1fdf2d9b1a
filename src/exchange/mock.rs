//! In-memory Kraken Futures stand-in for tests and offline runs.

use super::error::KrakenError;
use super::traits::FuturesApi;
use super::types::*;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Canned account data served by [`MockKrakenClient`].
#[derive(Debug, Default)]
pub struct MockAccountState {
    pub logs: Vec<AccountLogEntry>,
    pub executions: Vec<ExecutionEvent>,
    pub positions: Vec<OpenPosition>,
    pub tickers: HashMap<String, Ticker>,
    pub fee_schedules: Vec<FeeSchedule>,
    pub fee_volumes: HashMap<String, Decimal>,
    /// API key -> error message returned for every call
    pub rejected_keys: HashMap<String, String>,
    /// Symbols whose ticker request fails
    pub failing_symbols: HashSet<String>,
    pub fail_executions: bool,
}

/// Mock client that answers from [`MockAccountState`] and counts calls.
#[derive(Debug, Default)]
pub struct MockKrakenClient {
    state: RwLock<MockAccountState>,
    account_log_calls: AtomicUsize,
    execution_calls: AtomicUsize,
    ticker_calls: AtomicUsize,
    fee_schedule_calls: AtomicUsize,
}

impl MockKrakenClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logs(mut self, logs: Vec<AccountLogEntry>) -> Self {
        self.state.get_mut().logs = logs;
        self
    }

    pub fn with_executions(mut self, executions: Vec<ExecutionEvent>) -> Self {
        self.state.get_mut().executions = executions;
        self
    }

    pub fn with_positions(mut self, positions: Vec<OpenPosition>) -> Self {
        self.state.get_mut().positions = positions;
        self
    }

    pub fn with_ticker(mut self, ticker: Ticker) -> Self {
        self.state
            .get_mut()
            .tickers
            .insert(ticker.symbol.to_uppercase(), ticker);
        self
    }

    pub fn with_fee_schedules(
        mut self,
        schedules: Vec<FeeSchedule>,
        volumes: HashMap<String, Decimal>,
    ) -> Self {
        let state = self.state.get_mut();
        state.fee_schedules = schedules;
        state.fee_volumes = volumes;
        self
    }

    /// Every call made with `api_key` fails with `Api(message)`.
    pub fn reject_key(mut self, api_key: &str, message: &str) -> Self {
        self.state
            .get_mut()
            .rejected_keys
            .insert(api_key.to_string(), message.to_string());
        self
    }

    pub fn fail_symbol(mut self, symbol: &str) -> Self {
        self.state
            .get_mut()
            .failing_symbols
            .insert(symbol.to_uppercase());
        self
    }

    pub fn fail_executions(mut self) -> Self {
        self.state.get_mut().fail_executions = true;
        self
    }

    pub fn account_log_calls(&self) -> usize {
        self.account_log_calls.load(Ordering::SeqCst)
    }

    pub fn execution_calls(&self) -> usize {
        self.execution_calls.load(Ordering::SeqCst)
    }

    pub fn ticker_calls(&self) -> usize {
        self.ticker_calls.load(Ordering::SeqCst)
    }

    pub fn fee_schedule_calls(&self) -> usize {
        self.fee_schedule_calls.load(Ordering::SeqCst)
    }

    async fn authorize(&self, creds: &Credentials) -> Result<(), KrakenError> {
        match self.state.read().await.rejected_keys.get(&creds.api_key) {
            Some(message) => Err(KrakenError::Api(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl FuturesApi for MockKrakenClient {
    async fn account_logs(
        &self,
        creds: &Credentials,
        query: &AccountLogQuery,
    ) -> Result<Vec<AccountLogEntry>, KrakenError> {
        self.account_log_calls.fetch_add(1, Ordering::SeqCst);
        self.authorize(creds).await?;

        let state = self.state.read().await;
        let mut logs: Vec<(i64, AccountLogEntry)> = state
            .logs
            .iter()
            .filter(|log| query.info.is_empty() || query.info.contains(&log.info))
            .filter_map(|log| log.timestamp().map(|ts| (ts.timestamp_millis(), log.clone())))
            .filter(|(ts, _)| *ts >= query.since_ms && *ts < query.before_ms)
            .collect();

        // Kraken returns the newest rows first
        logs.sort_by(|a, b| b.0.cmp(&a.0));
        if query.limit == 1 {
            logs.truncate(1);
        }

        debug!("Mock returning {} account log rows", logs.len());
        Ok(logs.into_iter().map(|(_, log)| log).collect())
    }

    async fn execution_events(
        &self,
        creds: &Credentials,
        since_ms: i64,
        before_ms: i64,
    ) -> Result<Vec<ExecutionEvent>, KrakenError> {
        self.execution_calls.fetch_add(1, Ordering::SeqCst);
        self.authorize(creds).await?;

        let state = self.state.read().await;
        if state.fail_executions {
            return Err(KrakenError::Status {
                status: 500,
                body: "executions unavailable".to_string(),
            });
        }

        let mut events: Vec<ExecutionEvent> = state
            .executions
            .iter()
            .filter(|e| {
                e.timestamp
                    .map(|ts| ts >= since_ms && ts < before_ms)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn open_positions(&self, creds: &Credentials) -> Result<Vec<OpenPosition>, KrakenError> {
        self.authorize(creds).await?;
        Ok(self.state.read().await.positions.clone())
    }

    async fn ticker(&self, creds: &Credentials, symbol: &str) -> Result<Option<Ticker>, KrakenError> {
        self.ticker_calls.fetch_add(1, Ordering::SeqCst);
        self.authorize(creds).await?;

        let state = self.state.read().await;
        let key = symbol.to_uppercase();
        if state.failing_symbols.contains(&key) {
            return Err(KrakenError::Status {
                status: 404,
                body: format!("unknown symbol {}", symbol),
            });
        }
        Ok(state.tickers.get(&key).cloned())
    }

    async fn fee_schedules(&self, creds: &Credentials) -> Result<Vec<FeeSchedule>, KrakenError> {
        self.fee_schedule_calls.fetch_add(1, Ordering::SeqCst);
        self.authorize(creds).await?;
        Ok(self.state.read().await.fee_schedules.clone())
    }

    async fn fee_volumes(&self, creds: &Credentials) -> Result<HashMap<String, Decimal>, KrakenError> {
        self.authorize(creds).await?;
        Ok(self.state.read().await.fee_volumes.clone())
    }
}
