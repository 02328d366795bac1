use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    session::Session,
    store::{self, store::StateStore},
    utils::clock::Clock,
};

use super::{
    command::{Command, EngineMsg, Outcome, Rejection},
    ticker::TickSchedule,
};

/// The single owner of the current-session state machine (idle, active,
/// paused). Handlers re-read the store on every operation; the store is the
/// source of truth shared with every other surface, the engine only owns the
/// right to mutate it.
///
/// Minute counting is tick-based: one increment per delivered tick, exactly
/// like the alarm counter this replaces. Ticks missed while the host was
/// suspended under-count rather than double-count.
pub struct SessionEngine<S> {
    store: S,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    tick_sender: mpsc::Sender<EngineMsg>,
    tick_cancel: Option<CancellationToken>,
}

impl<S: StateStore> SessionEngine<S> {
    pub(crate) fn new(
        store: S,
        clock: Arc<dyn Clock>,
        tick_interval: Duration,
        tick_sender: mpsc::Sender<EngineMsg>,
    ) -> Self {
        Self {
            store,
            clock,
            tick_interval,
            tick_sender,
            tick_cancel: None,
        }
    }

    /// Re-arms the tick schedule when a persisted active session is found.
    /// This is what lets elapsed tracking survive a process restart.
    pub async fn restore(&mut self) -> Result<()> {
        if let Some(session) = store::current_session(&self.store).await? {
            if session.is_active {
                info!(
                    "Resuming tick schedule for session {} ({})",
                    session.id, session.project_name
                );
                self.arm_ticker();
            }
        }
        Ok(())
    }

    pub async fn handle(&mut self, command: Command) -> Result<Outcome> {
        match command {
            Command::Start { project_name } => self.start(&project_name).await,
            Command::Stop => self.stop().await,
            Command::TogglePause => self.toggle_pause().await,
            Command::GetStatus => Ok(Outcome::Status(
                store::current_session(&self.store).await?,
            )),
            Command::GetSessions => Ok(Outcome::Sessions(store::sessions(&self.store).await?)),
            Command::UpdateSession { session_id, patch } => {
                self.edit_history(&session_id, |session| {
                    session.apply(patch);
                    Outcome::Updated
                })
                .await
            }
            Command::ToggleReported { session_id } => {
                self.edit_history(&session_id, |session| {
                    session.reported_to_external = !session.reported_to_external;
                    Outcome::ReportedToggled {
                        reported_to_external: session.reported_to_external,
                    }
                })
                .await
            }
        }
    }

    async fn start(&mut self, project_name: &str) -> Result<Outcome> {
        if let Some(current) = store::current_session(&self.store).await? {
            if current.is_active {
                warn!(
                    "Rejecting start of '{project_name}': session {} is already active",
                    current.id
                );
                return Ok(Outcome::Rejected(Rejection::AlreadyActive));
            }
        }

        let session = Session::begin(project_name, self.clock.time());
        store::set_current_session(&self.store, Some(&session)).await?;
        self.arm_ticker();
        info!(
            "Started session {} on '{}'",
            session.id, session.project_name
        );
        Ok(Outcome::Started(session))
    }

    async fn stop(&mut self) -> Result<Outcome> {
        let Some(mut session) = store::current_session(&self.store).await? else {
            return Ok(Outcome::Rejected(Rejection::NoActiveSession));
        };

        session.finalize(self.clock.time());
        let mut sessions = store::sessions(&self.store).await?;
        sessions.insert(0, session.clone());
        store::set_sessions(&self.store, &sessions).await?;
        store::set_current_session(&self.store, None).await?;
        self.disarm_ticker();
        info!(
            "Stopped session {} after {} active minutes",
            session.id, session.active_minutes
        );
        Ok(Outcome::Stopped(session))
    }

    async fn toggle_pause(&mut self) -> Result<Outcome> {
        let Some(mut session) = store::current_session(&self.store).await? else {
            return Ok(Outcome::Rejected(Rejection::NoActiveSession));
        };

        // The schedule keeps running while paused; the pause flag only gates
        // the increment in handle_tick.
        session.is_paused = !session.is_paused;
        store::set_current_session(&self.store, Some(&session)).await?;
        Ok(Outcome::PauseToggled {
            is_paused: session.is_paused,
        })
    }

    /// One delivered tick. Ticks while idle or paused, and ticks that raced a
    /// stop, are absorbed here instead of being queued anywhere.
    pub async fn handle_tick(&mut self) -> Result<()> {
        let Some(mut session) = store::current_session(&self.store).await? else {
            return Ok(());
        };
        if !session.is_running() {
            return Ok(());
        }

        session.active_minutes += 1;
        store::set_current_session(&self.store, Some(&session)).await?;
        debug!(
            "Session {} advanced to {} active minutes",
            session.id, session.active_minutes
        );
        Ok(())
    }

    async fn edit_history(
        &mut self,
        session_id: &str,
        edit: impl FnOnce(&mut Session) -> Outcome,
    ) -> Result<Outcome> {
        let mut sessions = store::sessions(&self.store).await?;
        let Some(session) = sessions.iter_mut().find(|s| s.id == session_id) else {
            return Ok(Outcome::Rejected(Rejection::UnknownSession));
        };
        let outcome = edit(session);
        store::set_sessions(&self.store, &sessions).await?;
        Ok(outcome)
    }

    fn arm_ticker(&mut self) {
        self.disarm_ticker();
        let cancel = CancellationToken::new();
        let schedule = TickSchedule::new(
            self.tick_sender.clone(),
            cancel.clone(),
            self.tick_interval,
            self.clock.clone(),
        );
        tokio::spawn(schedule.run());
        self.tick_cancel = Some(cancel);
    }

    pub(crate) fn disarm_ticker(&mut self) {
        if let Some(cancel) = self.tick_cancel.take() {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::{anyhow, Result};
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
    use serde_json::Value;
    use tokio::{
        sync::{broadcast, mpsc},
        time::Instant,
    };

    use crate::{
        engine::command::{Command, EngineMsg, Outcome, Rejection},
        session::SessionPatch,
        store::{
            self,
            store::{MemoryStore, StateStore},
            StoreChange, StoreKey,
        },
        utils::clock::Clock,
    };

    use super::SessionEngine;

    fn test_start_date() -> NaiveDateTime {
        NaiveDateTime::new(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(), NaiveTime::MIN)
    }

    struct FixedClock(DateTime<Utc>);

    #[async_trait::async_trait]
    impl Clock for FixedClock {
        fn time(&self) -> DateTime<Utc> {
            self.0
        }

        fn instant(&self) -> Instant {
            Instant::now()
        }

        async fn sleep_until(&self, instant: tokio::time::Instant) {
            tokio::time::sleep_until(instant).await;
        }
    }

    fn test_engine<S: StateStore>(store: S) -> (SessionEngine<S>, mpsc::Receiver<EngineMsg>) {
        let (sender, receiver) = mpsc::channel(10);
        let engine = SessionEngine::new(
            store,
            Arc::new(FixedClock(Utc.from_utc_datetime(&test_start_date()))),
            Duration::from_secs(60),
            sender,
        );
        (engine, receiver)
    }

    async fn start(engine: &mut SessionEngine<impl StateStore>, project: &str) -> Outcome {
        engine
            .handle(Command::Start {
                project_name: project.into(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn tick_pause_resume_stop_scenario() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (mut engine, _ticks) = test_engine(store.clone());

        assert!(matches!(
            start(&mut engine, "Labeling").await,
            Outcome::Started(_)
        ));

        for expected in 1..=3 {
            engine.handle_tick().await?;
            let current = store::current_session(&store).await?.unwrap();
            assert_eq!(current.active_minutes, expected);
        }

        assert_eq!(
            engine.handle(Command::TogglePause).await?,
            Outcome::PauseToggled { is_paused: true }
        );
        engine.handle_tick().await?;
        engine.handle_tick().await?;
        assert_eq!(
            store::current_session(&store).await?.unwrap().active_minutes,
            3
        );

        assert_eq!(
            engine.handle(Command::TogglePause).await?,
            Outcome::PauseToggled { is_paused: false }
        );
        engine.handle_tick().await?;

        let Outcome::Stopped(session) = engine.handle(Command::Stop).await? else {
            panic!("stop should finalize the session");
        };
        assert_eq!(session.active_minutes, 4);
        assert!(!session.is_active);
        assert!(session.end_time.is_some());

        let history = store::sessions(&store).await?;
        assert_eq!(history[0], session);
        assert_eq!(store::current_session(&store).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn start_while_active_is_rejected() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (mut engine, _ticks) = test_engine(store.clone());

        start(&mut engine, "Labeling").await;
        let before = store::current_session(&store).await?;

        assert_eq!(
            start(&mut engine, "Another").await,
            Outcome::Rejected(Rejection::AlreadyActive)
        );
        assert_eq!(store::current_session(&store).await?, before);
        Ok(())
    }

    #[tokio::test]
    async fn stop_and_pause_while_idle_are_rejected() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (mut engine, _ticks) = test_engine(store.clone());

        assert_eq!(
            engine.handle(Command::Stop).await?,
            Outcome::Rejected(Rejection::NoActiveSession)
        );
        assert_eq!(
            engine.handle(Command::TogglePause).await?,
            Outcome::Rejected(Rejection::NoActiveSession)
        );
        assert_eq!(store::sessions(&store).await?, vec![]);
        Ok(())
    }

    #[tokio::test]
    async fn ticks_while_idle_are_absorbed() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (mut engine, _ticks) = test_engine(store.clone());

        engine.handle_tick().await?;
        assert_eq!(store::current_session(&store).await?, None);
        assert_eq!(store::sessions(&store).await?, vec![]);
        Ok(())
    }

    #[tokio::test]
    async fn consecutive_sessions_prepend_to_history() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (mut engine, _ticks) = test_engine(store.clone());

        start(&mut engine, "First").await;
        engine.handle(Command::Stop).await?;
        start(&mut engine, "Second").await;
        engine.handle(Command::Stop).await?;

        let history = store::sessions(&store).await?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].project_name, "Second");
        assert_eq!(history[1].project_name, "First");
        Ok(())
    }

    #[tokio::test]
    async fn history_edits_require_a_known_id() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (mut engine, _ticks) = test_engine(store.clone());

        start(&mut engine, "Labeling").await;
        let Outcome::Stopped(session) = engine.handle(Command::Stop).await? else {
            panic!("stop should finalize the session");
        };

        assert_eq!(
            engine
                .handle(Command::UpdateSession {
                    session_id: "missing".into(),
                    patch: SessionPatch::default(),
                })
                .await?,
            Outcome::Rejected(Rejection::UnknownSession)
        );

        assert_eq!(
            engine
                .handle(Command::UpdateSession {
                    session_id: session.id.clone(),
                    patch: SessionPatch {
                        project_name: Some("Renamed".into()),
                        active_minutes: Some(42),
                        ..Default::default()
                    },
                })
                .await?,
            Outcome::Updated
        );

        let history = store::sessions(&store).await?;
        assert_eq!(history[0].project_name, "Renamed");
        assert_eq!(history[0].active_minutes, 42);
        Ok(())
    }

    #[tokio::test]
    async fn toggle_reported_flips_the_flag() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (mut engine, _ticks) = test_engine(store.clone());

        start(&mut engine, "Labeling").await;
        let Outcome::Stopped(session) = engine.handle(Command::Stop).await? else {
            panic!("stop should finalize the session");
        };

        let toggle = Command::ToggleReported {
            session_id: session.id.clone(),
        };
        assert_eq!(
            engine.handle(toggle.clone()).await?,
            Outcome::ReportedToggled {
                reported_to_external: true
            }
        );
        assert_eq!(
            engine.handle(toggle).await?,
            Outcome::ReportedToggled {
                reported_to_external: false
            }
        );
        assert_eq!(
            engine
                .handle(Command::ToggleReported {
                    session_id: "missing".into(),
                })
                .await?,
            Outcome::Rejected(Rejection::UnknownSession)
        );
        Ok(())
    }

    struct FailingStore;

    impl StateStore for FailingStore {
        async fn get(&self, _key: StoreKey) -> Result<Option<Value>> {
            Err(anyhow!("storage offline"))
        }

        async fn set(&self, _key: StoreKey, _value: Value) -> Result<()> {
            Err(anyhow!("storage offline"))
        }

        fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
            broadcast::channel(1).1
        }
    }

    #[tokio::test]
    async fn storage_failures_surface_as_errors_not_panics() {
        let (mut engine, _ticks) = test_engine(FailingStore);
        let result = engine
            .handle(Command::Start {
                project_name: "Labeling".into(),
            })
            .await;
        assert!(result.is_err());
        assert!(engine.handle_tick().await.is_err());
        assert!(engine.handle(Command::Stop).await.is_err());
    }
}
