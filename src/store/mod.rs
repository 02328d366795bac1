//! Shared persisted state for every surface.
//! The basic idea is:
//!  - All state lives under a handful of well-known keys holding JSON values.
//!  - Writers replace whole values; ordering per key is last-writer-wins.
//!  - Every write fans out a change notification so surfaces re-render on
//!    pushes instead of polling.
//!
//! Key names are stable: the session history and current session are written
//! only by the timer engine, while rate tables and the goal may be written by
//! any surface.

pub mod store;

use std::{fmt::Display, future};

use anyhow::Result;
use futures::{Stream, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::{
    earnings::{GoalConfig, GoalPeriod, RateTable},
    session::Session,
};

use store::StateStore;

/// Well-known storage keys. The string forms are the cross-surface contract
/// and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Sessions,
    CurrentSession,
    HourlyRates,
    BonusRates,
    GoalAmount,
    GoalPeriod,
}

impl StoreKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Sessions => "sessions",
            StoreKey::CurrentSession => "currentSession",
            StoreKey::HourlyRates => "hourlyRates",
            StoreKey::BonusRates => "bonusRates",
            StoreKey::GoalAmount => "goalAmount",
            StoreKey::GoalPeriod => "goalPeriod",
        }
    }

    /// File name used by the file-backed store.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivered to every subscriber after a key has been written.
#[derive(Debug, Clone)]
pub struct StoreChange {
    pub key: StoreKey,
    pub value: Value,
}

/// Change notifications as a stream. Lagged receivers skip ahead rather than
/// erroring; surfaces re-read whatever key they care about on each event.
pub fn changes(store: &impl StateStore) -> impl Stream<Item = StoreChange> {
    BroadcastStream::new(store.subscribe()).filter_map(|event| future::ready(event.ok()))
}

/// Reads and decodes one key. An absent key, a stored `null` and a value that
/// no longer matches the expected shape all read as `None`.
pub async fn read<T: DeserializeOwned>(store: &impl StateStore, key: StoreKey) -> Result<Option<T>> {
    let Some(value) = store.get(key).await? else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value(value) {
        Ok(decoded) => Ok(Some(decoded)),
        Err(e) => {
            // Stale values from other surfaces shouldn't break readers.
            warn!("Value under {key} doesn't match the expected shape: {e}");
            Ok(None)
        }
    }
}

pub async fn write<T: Serialize + ?Sized>(
    store: &impl StateStore,
    key: StoreKey,
    value: &T,
) -> Result<()> {
    store.set(key, serde_json::to_value(value)?).await
}

pub async fn sessions(store: &impl StateStore) -> Result<Vec<Session>> {
    Ok(read(store, StoreKey::Sessions).await?.unwrap_or_default())
}

pub async fn set_sessions(store: &impl StateStore, sessions: &[Session]) -> Result<()> {
    write(store, StoreKey::Sessions, sessions).await
}

pub async fn current_session(store: &impl StateStore) -> Result<Option<Session>> {
    read(store, StoreKey::CurrentSession).await
}

pub async fn set_current_session(
    store: &impl StateStore,
    session: Option<&Session>,
) -> Result<()> {
    match session {
        Some(session) => write(store, StoreKey::CurrentSession, session).await,
        None => store.set(StoreKey::CurrentSession, Value::Null).await,
    }
}

pub async fn hourly_rates(store: &impl StateStore) -> Result<RateTable> {
    Ok(read(store, StoreKey::HourlyRates).await?.unwrap_or_default())
}

pub async fn bonus_rates(store: &impl StateStore) -> Result<RateTable> {
    Ok(read(store, StoreKey::BonusRates).await?.unwrap_or_default())
}

pub async fn goal(store: &impl StateStore) -> Result<GoalConfig> {
    let defaults = GoalConfig::default();
    let amount: Option<f64> = read(store, StoreKey::GoalAmount).await?;
    let period: Option<GoalPeriod> = read(store, StoreKey::GoalPeriod).await?;
    Ok(GoalConfig {
        amount: amount.unwrap_or(defaults.amount),
        period: period.unwrap_or(defaults.period),
    })
}

pub async fn set_goal(store: &impl StateStore, goal: GoalConfig) -> Result<()> {
    write(store, StoreKey::GoalAmount, &goal.amount).await?;
    write(store, StoreKey::GoalPeriod, &goal.period).await
}
