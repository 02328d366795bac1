//! Pure earnings math: per-session amounts, window aggregation and goal
//! progress. Nothing here touches the store or the clock; callers pass
//! sessions, rate tables and a window start in.

use std::{collections::HashMap, fmt::Display};

use chrono::{DateTime, TimeZone, Utc};
use clap::ValueEnum;
use now::DateTimeNow;
use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Per-project hourly amounts. Keys are free-form project names, scraped or
/// user-entered; an unknown project simply resolves to zero.
pub type RateTable = HashMap<String, f64>;

/// The recurring window a monetary goal is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GoalPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl GoalPeriod {
    /// Start of the current window in the caller's time zone. Weeks begin on
    /// Monday.
    pub fn window_start<Tz: TimeZone>(&self, now: DateTime<Tz>) -> DateTime<Tz> {
        match self {
            GoalPeriod::Daily => now.beginning_of_day(),
            GoalPeriod::Weekly => now.beginning_of_week(),
            GoalPeriod::Monthly => now.beginning_of_month(),
        }
    }
}

impl Display for GoalPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GoalPeriod::Daily => write!(f, "daily"),
            GoalPeriod::Weekly => write!(f, "weekly"),
            GoalPeriod::Monthly => write!(f, "monthly"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoalConfig {
    pub amount: f64,
    pub period: GoalPeriod,
}

impl Default for GoalConfig {
    fn default() -> Self {
        GoalConfig {
            amount: 100.,
            period: GoalPeriod::Daily,
        }
    }
}

/// Amount earned by a single session: active hours times base rate plus
/// bonus. Unknown projects earn nothing rather than erroring.
pub fn earnings(session: &Session, rates: &RateTable, bonuses: &RateTable) -> f64 {
    let rate = rates.get(&session.project_name).copied().unwrap_or(0.);
    let bonus = bonuses.get(&session.project_name).copied().unwrap_or(0.);
    f64::from(session.active_minutes) / 60. * (rate + bonus)
}

/// Totals over one goal window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowSummary {
    pub total_minutes: u64,
    pub total_earnings: f64,
    pub session_count: usize,
    pub per_project_minutes: HashMap<String, u64>,
}

/// Sums sessions that started inside the window. A session belongs to the day
/// it started on; one that runs across the window boundary is counted whole,
/// never split.
pub fn aggregate(
    sessions: &[Session],
    rates: &RateTable,
    bonuses: &RateTable,
    window_start: DateTime<Utc>,
) -> WindowSummary {
    let mut summary = WindowSummary::default();
    for session in sessions {
        if session.start_time < window_start {
            continue;
        }
        summary.total_minutes += u64::from(session.active_minutes);
        summary.total_earnings += earnings(session, rates, bonuses);
        summary.session_count += 1;
        *summary
            .per_project_minutes
            .entry(session.project_name.clone())
            .or_default() += u64::from(session.active_minutes);
    }
    summary
}

/// Fraction of the goal reached, clamped to [0, 1]. A non-positive goal has
/// no meaningful progress and reports zero.
pub fn goal_progress(period_earnings: f64, goal_amount: f64) -> f64 {
    if goal_amount <= 0. {
        0.
    } else {
        (period_earnings / goal_amount).clamp(0., 1.)
    }
}

pub fn goal_complete(period_earnings: f64, goal_amount: f64) -> bool {
    goal_amount > 0. && period_earnings >= goal_amount
}
