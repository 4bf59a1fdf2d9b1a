//! Dashboard orchestration.
//!
//! Combines the exchange client, the TTL cache and the aggregations. The
//! account history for the configured window is fetched once per TTL and per
//! API key; every chart, summary and volume view is a slice of it.

use crate::analytics::{
    accumulate_costs, period_boundaries, process_history, replay_to_open, ChartSeries,
    PositionCosts, PositionDetail, PositionSummary, ProcessedHistory, VolumeSeries,
};
use crate::cache::{cache_key, TtlCache};
use crate::config::{CacheConfig, DashboardConfig};
use crate::exchange::{
    AccountLogQuery, Credentials, FeeInfo, FeeSchedule, Fill, FuturesApi, KrakenError,
    OpenPosition, Ticker, ENTRY_TYPE_FUNDING_RATE_CHANGE,
};
use crate::utils::time::{from_millis, MS_PER_DAY};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Width of each backwards search window when locating a position's open.
const OPEN_SEARCH_CHUNK_DAYS: i64 = 30;
/// How far back the open-time search goes.
const OPEN_SEARCH_MAX_DAYS: i64 = 730;
/// Cost accumulation never reaches further back than this.
const MAX_COST_HISTORY_DAYS: i64 = 365;

const FEE_SCHEDULES_KEY: &str = "public:fee_schedules";

pub struct DashboardService<A: FuturesApi + ?Sized> {
    api: Arc<A>,
    cache: TtlCache,
    fee_cache: TtlCache,
    settings: DashboardConfig,
}

impl<A: FuturesApi + ?Sized> Clone for DashboardService<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            cache: self.cache.clone(),
            fee_cache: self.fee_cache.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<A: FuturesApi + ?Sized> DashboardService<A> {
    pub fn new(api: Arc<A>, cache: TtlCache, cache_config: &CacheConfig, settings: DashboardConfig) -> Self {
        let fee_cache = cache.with_ttl(Duration::from_secs(cache_config.fee_schedule_ttl_secs));
        Self {
            api,
            cache,
            fee_cache,
            settings,
        }
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub fn settings(&self) -> &DashboardConfig {
        &self.settings
    }

    /// Cache namespace of one API key (the key itself is never stored).
    fn namespace(creds: &Credentials) -> String {
        cache_key(&[&creds.api_key])
    }

    fn history_key(creds: &Credentials, window_days: u32) -> String {
        format!("{}:history:{}", Self::namespace(creds), window_days)
    }

    /// Days fetched to answer a `days`-long view; never below `history_days`.
    fn window_for(&self, days: u32) -> u32 {
        days.max(self.settings.history_days)
    }

    // ==================== Account history ====================

    /// Processed history for the configured window.
    pub async fn history(&self, creds: &Credentials, force_refresh: bool) -> Result<ProcessedHistory, KrakenError> {
        self.history_at(creds, self.settings.history_days, force_refresh, Utc::now())
            .await
    }

    /// The trailing `days` of the account history. Requests longer than
    /// `history_days` fetch and cache their own, longer window.
    pub async fn history_for(
        &self,
        creds: &Credentials,
        days: u32,
        force_refresh: bool,
    ) -> Result<ProcessedHistory, KrakenError> {
        let window = self.window_for(days);
        Ok(self
            .history_at(creds, window, force_refresh, Utc::now())
            .await?
            .last_days(days))
    }

    /// Processed history of `window_days`, from cache unless stale or
    /// `force_refresh`.
    #[instrument(skip(self, creds))]
    pub async fn history_at(
        &self,
        creds: &Credentials,
        window_days: u32,
        force_refresh: bool,
        now: DateTime<Utc>,
    ) -> Result<ProcessedHistory, KrakenError> {
        let key = Self::history_key(creds, window_days);

        if !force_refresh {
            if let Some(cached) = self.cache.get_at::<ProcessedHistory>(&key, now.timestamp_millis()) {
                debug!("Using cached history");
                return Ok(cached);
            }
        }

        let (since, before) = period_boundaries(window_days, now);
        info!("Fetching {} days of account history", window_days);

        let query = AccountLogQuery::new(since, before).costs_only();
        let (logs, fills) = tokio::join!(
            self.api.account_logs(creds, &query),
            self.api.fills(creds, since, before)
        );
        let logs = logs?;
        let fills = fills.unwrap_or_else(|e| {
            warn!("Could not fetch execution events, volumes will be estimated: {}", e);
            Vec::new()
        });

        let history = process_history(&logs, &fills, window_days, now, self.settings.fallback_maker_fee);
        info!(
            "Processed {} log rows and {} fills into {} days",
            logs.len(),
            fills.len(),
            history.daily.len()
        );

        self.cache.put_at(&key, &history, now.timestamp_millis());
        Ok(history)
    }

    /// Cached history covering `days`, cut to them; `None` when nothing
    /// fresh is stored.
    pub fn cached_history(&self, creds: &Credentials, days: u32) -> Option<ProcessedHistory> {
        self.cache
            .get::<ProcessedHistory>(&Self::history_key(creds, self.window_for(days)))
            .map(|history| history.last_days(days))
    }

    pub async fn chart_data(&self, creds: &Credentials, days: u32, force_refresh: bool) -> Result<ChartSeries, KrakenError> {
        Ok(self.history_for(creds, days, force_refresh).await?.chart())
    }

    pub async fn volumes(&self, creds: &Credentials, days: u32, force_refresh: bool) -> Result<VolumeSeries, KrakenError> {
        Ok(self.history_for(creds, days, force_refresh).await?.volumes())
    }

    // ==================== Positions ====================

    /// Scan fills backwards in chunks until the position replays to flat.
    ///
    /// Returns the open time and every fill of the symbol that was scanned.
    async fn locate_open(
        &self,
        creds: &Credentials,
        symbol: &str,
        signed_size: Decimal,
        now_ms: i64,
    ) -> Result<(i64, Vec<Fill>), KrakenError> {
        let symbol = symbol.to_uppercase();
        let mut net = signed_size;
        let mut end = now_ms;
        let mut scanned: Vec<Fill> = Vec::new();

        for chunk in 0..(OPEN_SEARCH_MAX_DAYS / OPEN_SEARCH_CHUNK_DAYS) {
            let start = end - OPEN_SEARCH_CHUNK_DAYS * MS_PER_DAY;
            debug!("Searching chunk {} for {}: {} .. {}", chunk, symbol, start, end);

            let mut chunk_fills: Vec<Fill> = self
                .api
                .fills(creds, start, end)
                .await?
                .into_iter()
                .filter(|f| f.symbol == symbol && !f.signed_quantity.is_zero())
                .collect();
            chunk_fills.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));

            if let Some(opened) = replay_to_open(net, &chunk_fills) {
                info!("Found {} open at {}", symbol, opened);
                scanned.extend(chunk_fills);
                return Ok((opened, scanned));
            }

            net -= chunk_fills.iter().map(|f| f.signed_quantity).sum::<Decimal>();
            scanned.extend(chunk_fills);
            end = start;
        }

        if let Some(oldest) = scanned.iter().map(|f| f.timestamp_ms).min() {
            warn!("Could not find exact open for {}, using oldest trade at {}", symbol, oldest);
            return Ok((oldest, scanned));
        }

        warn!("No trades found for {}, defaulting to 30 days ago", symbol);
        Ok((now_ms - OPEN_SEARCH_CHUNK_DAYS * MS_PER_DAY, scanned))
    }

    /// When the position was opened (epoch ms).
    pub async fn find_open_time(
        &self,
        creds: &Credentials,
        symbol: &str,
        signed_size: Decimal,
        now_ms: i64,
    ) -> Result<i64, KrakenError> {
        Ok(self.locate_open(creds, symbol, signed_size, now_ms).await?.0)
    }

    /// Funding and fees accumulated since the position opened. Failures are
    /// reported in the result so one symbol cannot sink a batch.
    #[instrument(skip(self, creds, position), fields(symbol = %position.symbol))]
    pub async fn position_costs(&self, creds: &Credentials, position: &OpenPosition, now_ms: i64) -> PositionCosts {
        let symbol = position.symbol.to_uppercase();
        let size = position.signed_size();
        if symbol.is_empty() || size.is_zero() {
            return PositionCosts::failed(&position.symbol, "Missing symbol or size");
        }

        match self.compute_costs(creds, &symbol, size, now_ms).await {
            Ok(costs) => PositionCosts {
                symbol: position.symbol.clone(),
                ..costs
            },
            Err(e) => {
                warn!("Failed to accumulate costs for {}: {}", symbol, e);
                PositionCosts::failed(&position.symbol, e.to_string())
            }
        }
    }

    async fn compute_costs(
        &self,
        creds: &Credentials,
        symbol: &str,
        size: Decimal,
        now_ms: i64,
    ) -> Result<PositionCosts, KrakenError> {
        let (opened, fills) = self.locate_open(creds, symbol, size, now_ms).await?;

        let one_year_ago = now_ms - MAX_COST_HISTORY_DAYS * MS_PER_DAY;
        let data_is_capped = opened < one_year_ago;
        let fetch_from = opened.max(one_year_ago);
        if data_is_capped {
            warn!("Position {} is over a year old, capping history to one year", symbol);
        }

        let query = AccountLogQuery::new(fetch_from, now_ms).with_info(ENTRY_TYPE_FUNDING_RATE_CHANGE);
        let logs = self.api.account_logs(creds, &query).await?;
        let (funding, fees) = accumulate_costs(symbol, opened, fetch_from, &logs, &fills);

        Ok(PositionCosts {
            symbol: symbol.to_string(),
            opened_at_ms: Some(opened),
            accumulated_funding: funding,
            accumulated_fees: fees,
            data_is_capped,
            error: None,
        })
    }

    /// Costs for many positions, bounded in parallel, in input order.
    pub async fn batch_position_costs(
        &self,
        creds: &Credentials,
        positions: &[OpenPosition],
        now_ms: i64,
    ) -> Vec<PositionCosts> {
        stream::iter(positions.iter().cloned())
            .map(|position| async move { self.position_costs(creds, &position, now_ms).await })
            .buffered(self.api.max_concurrency().max(1))
            .collect()
            .await
    }

    pub async fn positions(&self, creds: &Credentials) -> Result<Vec<PositionSummary>, KrakenError> {
        let positions = self.api.open_positions(creds).await?;
        Ok(positions.iter().map(PositionSummary::from).collect())
    }

    /// Open positions with mark price, P&L and accumulated costs.
    #[instrument(skip(self, creds))]
    pub async fn detailed_positions(&self, creds: &Credentials) -> Result<Vec<PositionDetail>, KrakenError> {
        let positions = self.api.open_positions(creds).await?;
        if positions.is_empty() {
            return Ok(Vec::new());
        }

        let symbols: Vec<String> = positions.iter().map(|p| p.symbol.clone()).collect();
        let now_ms = Utc::now().timestamp_millis();
        let (tickers, costs) = tokio::join!(
            self.api.batch_tickers(creds, &symbols),
            self.batch_position_costs(creds, &positions, now_ms)
        );

        Ok(positions
            .iter()
            .zip(costs.iter())
            .map(|(position, costs)| {
                let price = tickers
                    .get(&position.symbol)
                    .and_then(|t| t.mark_price)
                    .unwrap_or(position.price);
                PositionDetail::build(position, price, costs)
            })
            .collect())
    }

    // ==================== Market ====================

    pub async fn ticker(&self, creds: &Credentials, symbol: &str) -> Result<Option<Ticker>, KrakenError> {
        self.api.ticker(creds, symbol).await
    }

    pub async fn batch_tickers(&self, creds: &Credentials, symbols: &[String]) -> HashMap<String, Ticker> {
        self.api.batch_tickers(creds, symbols).await
    }

    /// Fee level; the public schedule table is cached for its own TTL.
    pub async fn fee_info(&self, creds: &Credentials) -> Result<FeeInfo, KrakenError> {
        let schedules = match self.fee_cache.get::<Vec<FeeSchedule>>(FEE_SCHEDULES_KEY) {
            Some(schedules) => schedules,
            None => {
                let schedules = self.api.fee_schedules(creds).await?;
                self.fee_cache.put(FEE_SCHEDULES_KEY, &schedules);
                schedules
            }
        };
        let volumes = self.api.fee_volumes(creds).await?;
        Ok(FeeInfo::from_schedules(schedules, &volumes))
    }

    // ==================== Credentials & cache ====================

    /// Cheap authenticated call (last 24h of executions).
    pub async fn validate_credentials(&self, creds: &Credentials) -> Result<usize, KrakenError> {
        let now = Utc::now().timestamp_millis();
        let events = self.api.execution_events(creds, now - MS_PER_DAY, now).await?;
        info!("Credentials validated, fetched {} events", events.len());
        Ok(events.len())
    }

    /// Drop cached data of one API key, or everything.
    pub fn clear_cache(&self, creds: Option<&Credentials>) -> usize {
        let prefix = creds.map(|c| format!("{}:", Self::namespace(c))).unwrap_or_default();
        let removed = self.cache.invalidate_prefix(&prefix);
        info!("Cleared {} cache entries", removed);
        removed
    }

    pub fn purge_expired(&self, now_ms: i64) -> usize {
        // the longer-lived view keeps fee schedules alive
        if self.fee_cache.ttl() > self.cache.ttl() {
            self.fee_cache.purge_expired(now_ms)
        } else {
            self.cache.purge_expired(now_ms)
        }
    }
}

/// Human-readable UTC time for log lines and CLI output.
pub fn format_ms(ms: i64) -> String {
    from_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}
