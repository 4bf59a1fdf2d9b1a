//! Kraken Futures integration.
//!
//! Authenticated REST access for:
//! - Account history (account log, execution events)
//! - Open positions
//! - Tickers and fee schedules

mod client;
mod error;
pub mod mock;
mod traits;
mod types;

pub use client::{sign, KrakenClient};
pub use error::KrakenError;
pub use mock::MockKrakenClient;
pub use traits::FuturesApi;
pub use types::*;
