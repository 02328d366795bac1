//! Cli/daemon for tracking work sessions per project, with hourly rates,
//! bonuses and earnings goals. Sessions are counted in active minutes by a
//! background timer and persisted as plain json, so state survives restarts
//! and can be inspected by hand.

pub mod cli;
pub mod earnings;
pub mod engine;
pub mod rates;
pub mod session;
pub mod store;
pub mod utils;
