use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::Serialize;

/// One contiguous (possibly paused) interval of tracked work on a named
/// project. The wire format is shared with every surface reading the store, so
/// field names and the camelCase encoding are stable.
///
/// At most one session is active at a time. `end_time` is `None` exactly while
/// the session is active, and `active_minutes` only moves while the session is
/// active and unpaused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub project_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active_minutes: u32,
    pub is_active: bool,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub reported_to_external: bool,
}

pub const UNTITLED_PROJECT: &str = "Untitled Project";

impl Session {
    /// Creates a fresh active session. The id is derived from the start
    /// moment, which keeps ids stable under an injected test clock.
    pub fn begin(project_name: &str, now: DateTime<Utc>) -> Self {
        let project_name = project_name.trim();
        Session {
            id: now.timestamp_millis().to_string(),
            project_name: if project_name.is_empty() {
                UNTITLED_PROJECT.to_string()
            } else {
                project_name.to_string()
            },
            start_time: now,
            end_time: None,
            active_minutes: 0,
            is_active: true,
            is_paused: false,
            reported_to_external: false,
        }
    }

    /// True while ticks should advance `active_minutes`.
    pub fn is_running(&self) -> bool {
        self.is_active && !self.is_paused
    }

    /// Closes the session at `now`. The caller is responsible for moving it
    /// into the history list.
    pub fn finalize(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.end_time = Some(now);
    }

    pub fn apply(&mut self, patch: SessionPatch) {
        if let Some(name) = patch.project_name {
            self.project_name = name;
        }
        if let Some(start) = patch.start_time {
            self.start_time = start;
        }
        if let Some(end) = patch.end_time {
            // A closed session keeps an end time; only a new timestamp can
            // replace it. `endTime` stays null exactly while active.
            if end.is_some() || self.is_active {
                self.end_time = end;
            }
        }
        if let Some(minutes) = patch.active_minutes {
            self.active_minutes = minutes;
        }
    }
}

/// Partial edit of a historical session, issued from the history view. Absent
/// fields are left untouched. A present-null `end_time` asks for a clear,
/// which `apply` only honors while the session is still active.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_minutes: Option<u32>,
}
