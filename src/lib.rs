//! # Kraken Cost Dashboard
//!
//! Backend for a dashboard of trading fees, funding payments and open
//! positions on Kraken Futures.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Kraken Futures REST client, types and an in-memory mock
//! - `cache`: TTL cache over memory or SQLite storage
//! - `analytics`: Daily series, summaries and per-position cost accounting
//! - `service`: Fetch/cache orchestration used by the API and CLI
//! - `web`: Axum JSON API and credential cookies
//! - `utils`: Shared time and decimal helpers

pub mod analytics;
pub mod cache;
pub mod config;
pub mod exchange;
pub mod service;
pub mod utils;
pub mod web;

pub use config::Config;
