pub mod daemon_path;
pub mod process;
pub mod report;

use std::{
    env,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use daemon_path::to_daemon_path;
use process::{kill_running_daemons, restart_daemon};
use report::DateStyle;
use tracing::level_filters::LevelFilter;

use crate::{
    earnings::{GoalConfig, GoalPeriod},
    engine::{
        self,
        command::{Command, Outcome},
        ipc, start_daemon,
    },
    rates::{self, RateUpdate},
    session::SessionPatch,
    store::{self, store::FileStore},
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX},
        time::format_minutes,
    },
};

#[derive(Parser, Debug)]
#[command(name = "Flowtrack", version, long_about = None)]
#[command(about = "Work session tracker with per-project earnings and goals", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Start the background daemon that owns the session timer")]
    Init {},
    #[command(
        about = "Run the daemon directly in current console. Used for creating a daemon internally and for debugging"
    )]
    Serve {
        #[arg(
            long,
            help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
        )]
        dir: Option<PathBuf>,
    },
    #[command(about = "Stop the currently running daemon")]
    Shutdown {},
    #[command(about = "Start tracking a work session")]
    Start {
        #[arg(help = "Project to track. Priority tags like \"[PRIORITY +$5]\" become a bonus rate")]
        project_name: Option<String>,
        #[arg(long, help = "Advisory hourly rate to record for this project")]
        rate: Option<f64>,
        #[arg(long, help = "Advisory bonus per hour to record for this project")]
        bonus: Option<f64>,
    },
    #[command(about = "Stop the current session and move it into history")]
    Stop {},
    #[command(about = "Pause or resume the current session")]
    Pause {},
    #[command(about = "Show the current session and today's totals")]
    Status {},
    #[command(about = "List recorded sessions, most recent first")]
    Log {
        #[arg(long, help = "Show at most this many sessions")]
        limit: Option<usize>,
        #[arg(
            long,
            help = "Only sessions since this moment. Examples are \"yesterday\", \"1 hour ago\", \"15/03/2025\""
        )]
        since: Option<String>,
        #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
        date_style: DateStyle,
    },
    #[command(about = "Aggregate time and earnings over the goal window")]
    Report {
        #[arg(long, help = "Window to aggregate. Defaults to the goal period")]
        period: Option<GoalPeriod>,
    },
    #[command(about = "Show or change the earnings goal")]
    Goal {
        #[arg(long)]
        amount: Option<f64>,
        #[arg(long)]
        period: Option<GoalPeriod>,
    },
    #[command(about = "Manage per-project hourly rates")]
    Rate {
        #[command(subcommand)]
        command: RateCommand,
    },
    #[command(about = "Edit a recorded session")]
    Edit {
        session_id: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        minutes: Option<u32>,
    },
    #[command(about = "Toggle whether a session was reported to the work platform")]
    Reported { session_id: String },
}

#[derive(Subcommand, Debug)]
enum RateCommand {
    #[command(about = "Record an hourly rate for a project")]
    Set {
        project_name: String,
        rate: f64,
        #[arg(long)]
        bonus: Option<f64>,
    },
    #[command(about = "List recorded rates")]
    List {},
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let app_dir = create_application_default_path()?;
    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &app_dir, logging_level, args.log)?;

    match args.commands {
        Commands::Init {} => {
            restart_daemon()?;
            println!("Daemon started");
            Ok(())
        }
        Commands::Shutdown {} => {
            let daemon = to_daemon_path(env::current_exe()?);
            kill_running_daemons(&daemon);
            Ok(())
        }
        Commands::Serve { dir } => {
            start_daemon(dir.map_or(app_dir, |v| v)).await?;
            Ok(())
        }
        command => {
            let store = Arc::new(FileStore::new(app_dir.join("state"))?);
            run_store_command(command, &app_dir, store).await
        }
    }
}

/// Where a session command was executed.
enum Dispatch {
    /// The running daemon's engine handled it, serialized with its ticks.
    Daemon(Outcome),
    /// No daemon was listening; a short-lived local engine handled it.
    Local(Outcome),
}

impl Dispatch {
    fn outcome(self) -> Outcome {
        match self {
            Dispatch::Daemon(outcome) | Dispatch::Local(outcome) => outcome,
        }
    }
}

async fn dispatch(app_dir: &Path, store: &Arc<FileStore>, command: Command) -> Result<Dispatch> {
    if let Some(outcome) = ipc::send(&ipc::socket_path(app_dir), &command).await? {
        return Ok(Dispatch::Daemon(outcome));
    }
    Ok(Dispatch::Local(
        engine::execute(store.clone(), command).await?,
    ))
}

async fn run_store_command(
    command: Commands,
    app_dir: &Path,
    store: Arc<FileStore>,
) -> Result<()> {
    match command {
        Commands::Start {
            project_name,
            rate,
            bonus,
        } => {
            let raw = project_name.unwrap_or_default();
            let (project_name, priority_bonus) = rates::parse_project_title(&raw);
            rates::apply_rate_updates(
                &store,
                [RateUpdate {
                    project_name: project_name.clone(),
                    rate,
                    bonus: bonus.or(priority_bonus),
                }],
            )
            .await?;

            let dispatched = dispatch(app_dir, &store, Command::Start { project_name }).await?;
            let ran_locally = matches!(dispatched, Dispatch::Local(_));
            match dispatched.outcome() {
                Outcome::Started(session) => {
                    let rates = store::hourly_rates(&store).await?;
                    match rates.get(&session.project_name) {
                        Some(rate) => {
                            println!("Tracking '{}' at ${rate:.2}/hr", session.project_name)
                        }
                        None => println!(
                            "Tracking '{}' (no rate recorded yet)",
                            session.project_name
                        ),
                    }
                    if ran_locally {
                        // Hand ticking over to a fresh daemon; it restores
                        // the session from the store.
                        restart_daemon()?;
                    }
                    Ok(())
                }
                outcome => report_rejection(outcome),
            }
        }
        Commands::Stop {} => match dispatch(app_dir, &store, Command::Stop).await?.outcome() {
            Outcome::Stopped(session) => {
                let rates = store::hourly_rates(&store).await?;
                let bonuses = store::bonus_rates(&store).await?;
                println!(
                    "Stopped '{}' after {}, earned ${:.2}",
                    session.project_name,
                    format_minutes(u64::from(session.active_minutes)),
                    crate::earnings::earnings(&session, &rates, &bonuses),
                );
                Ok(())
            }
            outcome => report_rejection(outcome),
        },
        Commands::Pause {} => match dispatch(app_dir, &store, Command::TogglePause)
            .await?
            .outcome()
        {
            Outcome::PauseToggled { is_paused: true } => {
                println!("Paused");
                Ok(())
            }
            Outcome::PauseToggled { is_paused: false } => {
                println!("Resumed");
                Ok(())
            }
            outcome => report_rejection(outcome),
        },
        Commands::Status {} => report::print_status(&store).await,
        Commands::Log {
            limit,
            since,
            date_style,
        } => {
            let since = since
                .map(|v| report::parse_user_date(&v, date_style))
                .transpose()?;
            report::print_log(&store, limit, since).await
        }
        Commands::Report { period } => report::print_report(&store, period).await,
        Commands::Goal { amount, period } => {
            let current = store::goal(&store).await?;
            if amount.is_some() || period.is_some() {
                let updated = GoalConfig {
                    amount: amount.unwrap_or(current.amount),
                    period: period.unwrap_or(current.period),
                };
                store::set_goal(&store, updated).await?;
                println!("Goal set to ${:.2} {}", updated.amount, updated.period);
            } else {
                println!("Goal: ${:.2} {}", current.amount, current.period);
            }
            Ok(())
        }
        Commands::Rate { command } => match command {
            RateCommand::Set {
                project_name,
                rate,
                bonus,
            } => {
                rates::apply_rate_updates(
                    &store,
                    [RateUpdate {
                        project_name,
                        rate: Some(rate),
                        bonus,
                    }],
                )
                .await
            }
            RateCommand::List {} => report::print_rates(&store).await,
        },
        Commands::Edit {
            session_id,
            project,
            minutes,
        } => {
            let patch = SessionPatch {
                project_name: project,
                active_minutes: minutes,
                ..Default::default()
            };
            match dispatch(app_dir, &store, Command::UpdateSession { session_id, patch })
                .await?
                .outcome()
            {
                Outcome::Updated => {
                    println!("Session updated");
                    Ok(())
                }
                outcome => report_rejection(outcome),
            }
        }
        Commands::Reported { session_id } => {
            match dispatch(app_dir, &store, Command::ToggleReported { session_id })
                .await?
                .outcome()
            {
                Outcome::ReportedToggled {
                    reported_to_external,
                } => {
                    if reported_to_external {
                        println!("Marked as reported");
                    } else {
                        println!("Marked as not reported");
                    }
                    Ok(())
                }
                outcome => report_rejection(outcome),
            }
        }
        Commands::Init {} | Commands::Serve { .. } | Commands::Shutdown {} => unreachable!(),
    }
}

fn report_rejection(outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::Rejected(rejection) => {
            println!("Nothing to do: {rejection}");
            Ok(())
        }
        other => {
            // A reply of the wrong shape means the engine and cli disagree.
            Err(anyhow::anyhow!("unexpected engine reply {other:?}"))
        }
    }
}
