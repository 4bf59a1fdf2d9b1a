//! Shared helpers for money and timestamps.

pub mod decimal;
pub mod time;
