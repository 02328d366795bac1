use std::fmt::Display;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::session::{Session, SessionPatch};

/// The command surface consumed by presentation layers. Every mutating
/// operation on session state goes through here so that a single owner
/// serializes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
    #[serde(rename_all = "camelCase")]
    Start { project_name: String },
    Stop,
    TogglePause,
    GetStatus,
    GetSessions,
    #[serde(rename_all = "camelCase")]
    UpdateSession {
        session_id: String,
        patch: SessionPatch,
    },
    #[serde(rename_all = "camelCase")]
    ToggleReported { session_id: String },
}

/// Precondition violations. These are ordinary values reported back to the
/// caller, never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Rejection {
    AlreadyActive,
    NoActiveSession,
    UnknownSession,
}

impl Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::AlreadyActive => write!(f, "a session is already active"),
            Rejection::NoActiveSession => write!(f, "no active session"),
            Rejection::UnknownSession => write!(f, "no session with that id"),
        }
    }
}

/// Replies mirror [Command] on the wire so a remote surface can decode them.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Started(Session),
    Stopped(Session),
    #[serde(rename_all = "camelCase")]
    PauseToggled { is_paused: bool },
    Status(Option<Session>),
    Sessions(Vec<Session>),
    Updated,
    #[serde(rename_all = "camelCase")]
    ReportedToggled { reported_to_external: bool },
    Rejected(Rejection),
}

pub(crate) struct Request {
    pub command: Command,
    pub respond: oneshot::Sender<Result<Outcome>>,
}

/// Everything the engine loop consumes: surface requests and scheduled ticks
/// share one channel, which is what serializes them.
pub(crate) enum EngineMsg {
    Request(Request),
    Tick,
}

/// Cloneable handle surfaces use to talk to the engine.
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineMsg>,
}

impl EngineHandle {
    pub(crate) fn new(sender: mpsc::Sender<EngineMsg>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, command: Command) -> Result<Outcome> {
        let (respond, response) = oneshot::channel();
        self.sender
            .send(EngineMsg::Request(Request { command, respond }))
            .await
            .map_err(|_| anyhow!("timer engine is not running"))?;
        response
            .await
            .map_err(|_| anyhow!("timer engine dropped the request"))?
    }

    pub async fn status(&self) -> Result<Option<Session>> {
        match self.send(Command::GetStatus).await? {
            Outcome::Status(session) => Ok(session),
            other => Err(anyhow!("unexpected reply to getStatus: {other:?}")),
        }
    }

    pub async fn sessions(&self) -> Result<Vec<Session>> {
        match self.send(Command::GetSessions).await? {
            Outcome::Sessions(sessions) => Ok(sessions),
            other => Err(anyhow!("unexpected reply to getSessions: {other:?}")),
        }
    }
}
