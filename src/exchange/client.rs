//! Kraken Futures REST API client.

use super::error::KrakenError;
use super::traits::FuturesApi;
use super::types::*;
use crate::config::KrakenConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const ACCOUNT_LOG_PATH: &str = "/api/history/v3/account-log";
const EXECUTIONS_PATH: &str = "/api/history/v3/executions";
const OPEN_POSITIONS_PATH: &str = "/derivatives/api/v3/openpositions";
const TICKERS_PATH: &str = "/derivatives/api/v3/tickers";
const FEE_SCHEDULES_PATH: &str = "/derivatives/api/v3/feeschedules";
const FEE_VOLUMES_PATH: &str = "/derivatives/api/v3/feeschedules/volumes";

/// Safety limit on account-log pagination.
const MAX_LOG_PAGES: usize = 10;
/// Safety limit on execution pagination.
const MAX_EXECUTION_PAGES: usize = 50;

/// Compute the `Authent` header.
///
/// `base64(HMAC-SHA512(base64decode(secret), SHA256(post_data + nonce + path)))`
/// where `path` loses its `/derivatives` prefix.
pub fn sign(api_secret: &str, post_data: &str, nonce: &str, path: &str) -> Result<String, KrakenError> {
    let key = BASE64
        .decode(api_secret.trim())
        .map_err(|_| KrakenError::InvalidSecret)?;

    let endpoint = path.strip_prefix("/derivatives").unwrap_or(path);
    let mut hasher = Sha256::new();
    hasher.update(post_data.as_bytes());
    hasher.update(nonce.as_bytes());
    hasher.update(endpoint.as_bytes());
    let digest = hasher.finalize();

    let mut mac = Hmac::<Sha512>::new_from_slice(&key).map_err(|_| KrakenError::InvalidSecret)?;
    mac.update(&digest);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Authenticated Kraken Futures client. Credentials are passed per call since
/// every browser session brings its own key pair.
pub struct KrakenClient {
    http: Client,
    base_url: String,
    max_retries: u32,
    initial_retry_delay: Duration,
    log_page_delay: Duration,
    execution_page_delay: Duration,
    max_concurrency: usize,
    last_nonce: AtomicU64,
}

impl KrakenClient {
    /// Create a new client from configuration.
    pub fn new(config: &KrakenConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries.max(1),
            initial_retry_delay: config.initial_retry_delay(),
            log_page_delay: config.log_page_delay(),
            execution_page_delay: config.execution_page_delay(),
            max_concurrency: config.max_concurrency.max(1),
            last_nonce: AtomicU64::new(0),
        })
    }

    /// Millisecond nonce, strictly increasing across concurrent callers.
    fn next_nonce(&self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let previous = self
            .last_nonce
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }

    /// Signed GET with retry on transport errors, 429 and 5xx.
    #[instrument(skip(self, creds, query))]
    pub async fn request(
        &self,
        path: &str,
        creds: &Credentials,
        query: &[(String, String)],
    ) -> Result<Value, KrakenError> {
        let query_string = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let mut delay = self.initial_retry_delay;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.send_once(path, creds, &query_string).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!(
                        "Request to {} failed (attempt {}/{}): {}. Retrying in {:?}",
                        path, attempt, self.max_retries, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(KrakenError::Status { status: 429, .. }) => {
                    return Err(KrakenError::RateLimited { attempts: attempt });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(
        &self,
        path: &str,
        creds: &Credentials,
        query_string: &str,
    ) -> Result<Value, KrakenError> {
        let mut url = format!("{}{}", self.base_url, path);
        if !query_string.is_empty() {
            url.push('?');
            url.push_str(query_string);
        }

        let nonce = self.next_nonce().to_string();
        let authent = sign(&creds.api_secret, query_string, &nonce, path)?;

        let response = self
            .http
            .get(&url)
            .header("APIKey", &creds.api_key)
            .header("Nonce", &nonce)
            .header("Authent", authent)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!("HTTP Error {} from {}", status.as_u16(), path);
            debug!("Error body: {}", body);
            return Err(KrakenError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = serde_json::from_str(&body)?;
        check_api_error(&value)?;
        Ok(value)
    }
}

/// Kraken reports failures in-band with `error` and/or `result: "error"`.
fn check_api_error(value: &Value) -> Result<(), KrakenError> {
    let error = match value.get("error") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::Array(items)) if items.is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };

    if let Some(error) = error {
        return Err(KrakenError::Api(error));
    }

    if value.get("result").and_then(Value::as_str) == Some("error") {
        return Err(KrakenError::Api("unknown error".to_string()));
    }

    Ok(())
}

/// First array found under `keys` (or the value itself when it is an array).
fn take_array(value: &mut Value, keys: &[&str]) -> Value {
    if value.is_array() {
        return value.take();
    }

    for key in keys {
        if let Some(found) = value.get_mut(*key) {
            if found.is_array() {
                return found.take();
            }
        }
    }

    Value::Array(Vec::new())
}

#[async_trait]
impl FuturesApi for KrakenClient {
    #[instrument(skip(self, creds))]
    async fn account_logs(
        &self,
        creds: &Credentials,
        query: &AccountLogQuery,
    ) -> Result<Vec<AccountLogEntry>, KrakenError> {
        let mut all_logs = Vec::new();
        let mut current_before = query.before_ms;

        info!(
            "Fetching logs from {} to {}, limit per request: {}",
            query.since_ms, query.before_ms, query.limit
        );

        for page in 1..=MAX_LOG_PAGES {
            let mut params = vec![
                ("limit".to_string(), query.limit.to_string()),
                ("since".to_string(), query.since_ms.to_string()),
                ("before".to_string(), current_before.to_string()),
            ];
            params.extend(query.info.iter().map(|i| ("info".to_string(), i.clone())));

            let mut value = self.request(ACCOUNT_LOG_PATH, creds, &params).await?;
            let logs: Vec<AccountLogEntry> = serde_json::from_value(take_array(&mut value, &["logs"]))?;

            if logs.is_empty() {
                debug!("No more logs to fetch");
                break;
            }

            debug!("Fetched {} log entries on page {}", logs.len(), page);
            let page_len = logs.len();
            let oldest = logs.last().map(|l| l.date.clone()).unwrap_or_default();
            all_logs.extend(logs);

            if page_len < query.limit as usize || query.limit == 1 {
                break;
            }

            if oldest.is_empty() {
                warn!("No date in last log entry, stopping pagination");
                break;
            }

            let Some(new_before) = crate::utils::time::parse_log_date(&oldest)
                .map(|dt| dt.timestamp_millis())
            else {
                warn!("Unparseable log date {:?}, stopping pagination", oldest);
                break;
            };

            if new_before >= current_before {
                warn!("Pagination not making progress, stopping");
                break;
            }
            current_before = new_before;

            if page == MAX_LOG_PAGES {
                warn!("Reached maximum pages ({}) while paginating account logs", MAX_LOG_PAGES);
                break;
            }

            if !self.log_page_delay.is_zero() {
                tokio::time::sleep(self.log_page_delay).await;
            }
        }

        info!("Total logs fetched: {}", all_logs.len());
        Ok(all_logs)
    }

    #[instrument(skip(self, creds))]
    async fn execution_events(
        &self,
        creds: &Credentials,
        since_ms: i64,
        before_ms: i64,
    ) -> Result<Vec<ExecutionEvent>, KrakenError> {
        let mut all_events = Vec::new();
        let mut continuation_token: Option<String> = None;

        for page in 1..=MAX_EXECUTION_PAGES {
            let mut params = vec![
                ("since".to_string(), since_ms.to_string()),
                ("before".to_string(), before_ms.to_string()),
                ("sort".to_string(), "asc".to_string()),
            ];
            if let Some(token) = &continuation_token {
                params.push(("continuation_token".to_string(), token.clone()));
            }

            let mut value = self.request(EXECUTIONS_PATH, creds, &params).await?;
            let events: Vec<ExecutionEvent> =
                serde_json::from_value(take_array(&mut value, &["elements", "executions", "fills"]))?;

            if events.is_empty() {
                break;
            }
            debug!("Fetched {} execution events on page {}", events.len(), page);
            all_events.extend(events);

            let next = value
                .get("continuationToken")
                .or_else(|| value.get("continuation_token"))
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);

            match next {
                None => break,
                Some(token) if continuation_token.as_deref() == Some(token.as_str()) => {
                    warn!("Continuation token did not advance, stopping");
                    break;
                }
                Some(token) => continuation_token = Some(token),
            }

            if page == MAX_EXECUTION_PAGES {
                warn!(
                    "Reached maximum pages ({}) while paginating executions",
                    MAX_EXECUTION_PAGES
                );
                break;
            }

            if !self.execution_page_delay.is_zero() {
                tokio::time::sleep(self.execution_page_delay).await;
            }
        }

        info!("Total execution events fetched: {}", all_events.len());
        Ok(all_events)
    }

    #[instrument(skip(self, creds))]
    async fn open_positions(&self, creds: &Credentials) -> Result<Vec<OpenPosition>, KrakenError> {
        let mut value = self.request(OPEN_POSITIONS_PATH, creds, &[]).await?;
        let positions: Vec<OpenPosition> =
            serde_json::from_value(take_array(&mut value, &["openPositions"]))?;
        info!("Found {} open positions", positions.len());
        Ok(positions)
    }

    #[instrument(skip(self, creds))]
    async fn ticker(&self, creds: &Credentials, symbol: &str) -> Result<Option<Ticker>, KrakenError> {
        let path = format!("{}/{}", TICKERS_PATH, urlencoding::encode(symbol));
        let mut value = self.request(&path, creds, &[]).await?;

        match value.get_mut("ticker").map(Value::take) {
            None | Some(Value::Null) => Ok(None),
            Some(ticker) => Ok(Some(serde_json::from_value(ticker)?)),
        }
    }

    #[instrument(skip(self, creds))]
    async fn fee_schedules(&self, creds: &Credentials) -> Result<Vec<FeeSchedule>, KrakenError> {
        let mut value = self.request(FEE_SCHEDULES_PATH, creds, &[]).await?;
        Ok(serde_json::from_value(take_array(&mut value, &["feeSchedules"]))?)
    }

    #[instrument(skip(self, creds))]
    async fn fee_volumes(&self, creds: &Credentials) -> Result<HashMap<String, Decimal>, KrakenError> {
        let mut value = self.request(FEE_VOLUMES_PATH, creds, &[]).await?;

        match value.get_mut("volumesByFeeSchedule").map(Value::take) {
            None | Some(Value::Null) => Ok(HashMap::new()),
            Some(volumes) => Ok(serde_json::from_value(volumes)?),
        }
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}
