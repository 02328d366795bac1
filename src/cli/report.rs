use std::fmt::Display;

use ansi_term::Colour;
use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use chrono_english::parse_date_string;
use clap::ValueEnum;

use crate::{
    earnings::{self, GoalConfig, GoalPeriod},
    session::Session,
    store::{self, store::StateStore},
    utils::time::{format_minutes, format_timer},
};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

/// Parses human date input like "yesterday" or "15/03/2025" in the local
/// time zone.
pub fn parse_user_date(input: &str, style: DateStyle) -> Result<DateTime<Local>> {
    Ok(parse_date_string(input, Local::now(), style.into())?.with_timezone(&Local))
}

/// Current session plus today's totals, the way the popup surface shows them.
pub async fn print_status(store: &impl StateStore) -> Result<()> {
    let current = store::current_session(store).await?;
    let sessions = store::sessions(store).await?;
    let rates = store::hourly_rates(store).await?;
    let bonuses = store::bonus_rates(store).await?;

    match &current {
        Some(session) if session.is_active => {
            let state = if session.is_paused {
                Colour::Yellow.paint("paused")
            } else {
                Colour::Green.paint("active")
            };
            println!(
                "{}\t{}\t{}\t${:.2}",
                state,
                format_timer(session.active_minutes),
                session.project_name,
                earnings::earnings(session, &rates, &bonuses),
            );
        }
        _ => println!("No active session"),
    }

    let window = GoalPeriod::Daily
        .window_start(Local::now())
        .with_timezone(&Utc);
    let mut summary = earnings::aggregate(&sessions, &rates, &bonuses, window);
    // The live session counts toward today even though it isn't history yet.
    if let Some(session) = &current {
        if session.is_active && session.start_time >= window {
            summary.total_minutes += u64::from(session.active_minutes);
            summary.total_earnings += earnings::earnings(session, &rates, &bonuses);
            summary.session_count += 1;
        }
    }

    println!(
        "Today: {} across {} sessions, ${:.2} earned",
        format_minutes(summary.total_minutes),
        summary.session_count,
        summary.total_earnings,
    );
    Ok(())
}

/// Prints history most-recent-first, one session per line.
pub async fn print_log(
    store: &impl StateStore,
    limit: Option<usize>,
    since: Option<DateTime<Local>>,
) -> Result<()> {
    let sessions = store::sessions(store).await?;
    let rates = store::hourly_rates(store).await?;
    let bonuses = store::bonus_rates(store).await?;

    let since = since.map(|v| v.with_timezone(&Utc));
    let shown = sessions
        .iter()
        .filter(|s| since.map_or(true, |cutoff| s.start_time >= cutoff))
        .take(limit.unwrap_or(usize::MAX));

    let mut any = false;
    for session in shown {
        any = true;
        println!("{}", format_log_line(session, &rates, &bonuses));
    }
    if !any {
        println!("No sessions recorded yet");
    }
    Ok(())
}

fn format_log_line(
    session: &Session,
    rates: &earnings::RateTable,
    bonuses: &earnings::RateTable,
) -> String {
    let start = session.start_time.with_timezone(&Local);
    let end = session
        .end_time
        .map(|v| v.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "--".to_string());
    let reported = if session.reported_to_external {
        "reported"
    } else {
        ""
    };
    format!(
        "{}\t{} - {}\t{}\t${:.2}\t{}\t{}\t{}",
        start.format("%x"),
        start.format("%H:%M"),
        end,
        format_minutes(u64::from(session.active_minutes)),
        earnings::earnings(session, rates, bonuses),
        session.project_name,
        session.id,
        reported,
    )
}

const GOAL_BAR_WIDTH: usize = 30;

/// Aggregates the goal window and renders totals, the per-project breakdown
/// and a goal progress bar.
pub async fn print_report(store: &impl StateStore, period: Option<GoalPeriod>) -> Result<()> {
    let goal = store::goal(store).await?;
    let period = period.unwrap_or(goal.period);
    let sessions = store::sessions(store).await?;
    let rates = store::hourly_rates(store).await?;
    let bonuses = store::bonus_rates(store).await?;

    let window = period.window_start(Local::now());
    let summary = earnings::aggregate(&sessions, &rates, &bonuses, window.with_timezone(&Utc));

    println!(
        "{period} report since {}",
        window.format("%x %H:%M"),
    );
    println!(
        "Total: {} across {} sessions, ${:.2} earned",
        format_minutes(summary.total_minutes),
        summary.session_count,
        summary.total_earnings,
    );

    let mut breakdown: Vec<_> = summary.per_project_minutes.iter().collect();
    breakdown.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (project, minutes) in breakdown {
        println!("  {}\t{}", format_minutes(*minutes), project);
    }

    if period == goal.period {
        print_goal_progress(&goal, summary.total_earnings);
    }
    Ok(())
}

pub fn print_goal_progress(goal: &GoalConfig, period_earnings: f64) {
    let progress = earnings::goal_progress(period_earnings, goal.amount);
    let filled = (progress * GOAL_BAR_WIDTH as f64).round() as usize;
    let bar = format!(
        "{}{}",
        "█".repeat(filled),
        "░".repeat(GOAL_BAR_WIDTH - filled)
    );
    let complete = earnings::goal_complete(period_earnings, goal.amount);
    let bar = if complete {
        Colour::Green.paint(bar)
    } else {
        Colour::Blue.paint(bar)
    };
    println!(
        "Goal: {} ${:.2} / ${:.2} ({:.0}%)",
        bar,
        period_earnings,
        goal.amount,
        progress * 100.,
    );
    if complete {
        println!("{}", Colour::Green.paint("Goal achieved!"));
    }
}

pub async fn print_rates(store: &impl StateStore) -> Result<()> {
    let rates = store::hourly_rates(store).await?;
    let bonuses = store::bonus_rates(store).await?;

    let mut projects: Vec<_> = rates.keys().chain(bonuses.keys()).collect();
    projects.sort();
    projects.dedup();

    if projects.is_empty() {
        println!("No rates recorded yet");
        return Ok(());
    }
    for project in projects {
        let rate = rates.get(project).copied().unwrap_or(0.);
        match bonuses.get(project).copied().filter(|b| *b > 0.) {
            Some(bonus) => println!("${rate:.2}/hr (+${bonus:.2} bonus)\t{project}"),
            None => println!("${rate:.2}/hr\t{project}"),
        }
    }
    Ok(())
}
