use std::{path::PathBuf, pin::pin, sync::Arc, time::Duration};

use anyhow::Result;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{
    store::{
        self,
        store::{FileStore, StateStore},
    },
    utils::clock::{Clock, DefaultClock},
};

pub mod args;
pub mod command;
pub mod ipc;
pub mod shutdown;
pub mod ticker;
pub mod timer;

use command::{Command, EngineHandle, EngineMsg, Outcome};
use timer::SessionEngine;

/// One tick per minute of wall time; each tick advances the active session by
/// one minute.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

const COMMAND_CHANNEL_CAPACITY: usize = 10;

/// Wires up an engine over `store`. The returned handle is the command
/// surface; the loop must be driven (`EngineLoop::run`) for anything to
/// happen.
pub fn create_engine<S: StateStore>(
    store: S,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    shutdown: CancellationToken,
) -> (EngineHandle, EngineLoop<S>) {
    let (sender, receiver) = mpsc::channel::<EngineMsg>(COMMAND_CHANNEL_CAPACITY);
    let engine = SessionEngine::new(store, clock, tick_interval, sender.clone());
    (
        EngineHandle::new(sender),
        EngineLoop {
            receiver,
            engine,
            shutdown,
        },
    )
}

/// Receive loop of the engine owner. Commands and ticks arrive over the same
/// channel, so every mutation of session state is serialized here. Individual
/// command failures are reported to the caller and logged, never fatal.
pub struct EngineLoop<S> {
    receiver: mpsc::Receiver<EngineMsg>,
    engine: SessionEngine<S>,
    shutdown: CancellationToken,
}

impl<S: StateStore> EngineLoop<S> {
    pub async fn run(mut self) -> Result<()> {
        self.engine.restore().await?;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                message = self.receiver.recv() => match message {
                    Some(EngineMsg::Tick) => {
                        if let Err(e) = self.engine.handle_tick().await {
                            error!("Error advancing session on tick {e:?}");
                        }
                    }
                    Some(EngineMsg::Request(request)) => {
                        debug!("Handling command {:?}", request.command);
                        let outcome = self.engine.handle(request.command).await;
                        if let Err(e) = &outcome {
                            error!("Command failed {e:?}");
                        }
                        let _ = request.respond.send(outcome);
                    }
                    None => break,
                }
            }
        }
        self.engine.disarm_ticker();
        self.receiver.close();
        Ok(())
    }
}

/// Runs a local engine just long enough to execute a single command against
/// the store. Only for when no daemon is listening; while one runs, commands
/// must go through [ipc::send] so the daemon's engine serializes them with
/// its ticks.
pub async fn execute<S: StateStore>(store: S, command: Command) -> Result<Outcome> {
    let shutdown = CancellationToken::new();
    let (handle, engine_loop) = create_engine(
        store,
        Arc::new(DefaultClock),
        DEFAULT_TICK_INTERVAL,
        shutdown.clone(),
    );
    let runner = tokio::spawn(engine_loop.run());
    let outcome = handle.send(command).await;
    shutdown.cancel();
    runner.await??;
    outcome
}

/// Represents the starting point for the daemon: the one engine over the
/// shared file store, the command socket feeding it, and the tick schedule of
/// any persisted session.
pub async fn start_daemon(dir: PathBuf) -> Result<()> {
    let store = Arc::new(FileStore::new(dir.join("state"))?);

    let shutdown_token = CancellationToken::new();

    let (handle, engine_loop) = create_engine(
        store.clone(),
        Arc::new(DefaultClock),
        DEFAULT_TICK_INTERVAL,
        shutdown_token.clone(),
    );

    let (_, engine_result, server_result, _) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        engine_loop.run(),
        ipc::serve(ipc::socket_path(&dir), handle, shutdown_token.clone()),
        observe_changes(store.clone(), shutdown_token.clone()),
    );

    if let Err(engine_result) = engine_result {
        error!("Timer engine got an error {:?}", engine_result);
    }
    if let Err(server_result) = server_result {
        error!("Command socket got an error {:?}", server_result);
    }

    Ok(())
}

/// Logs every store write. Surfaces subscribe the same way to re-render on
/// pushes instead of polling.
async fn observe_changes(store: Arc<FileStore>, shutdown: CancellationToken) {
    let mut changes = pin!(store::changes(&store));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            change = changes.next() => match change {
                Some(change) => debug!("Key {} was updated", change.key),
                None => return,
            }
        }
    }
}

#[cfg(test)]
mod engine_tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use crate::{
        engine::{
            command::{Command, Outcome},
            create_engine,
        },
        session::Session,
        store::{self, store::MemoryStore},
        utils::{clock::Clock, logging::TEST_LOGGING},
    };

    fn test_start_date() -> NaiveDateTime {
        NaiveDateTime::new(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(), NaiveTime::MIN)
    }

    #[derive(Clone)]
    struct TestClock {
        start_time: DateTime<Utc>,
        reference: Instant,
    }

    impl TestClock {
        fn new() -> Self {
            Self {
                start_time: Utc.from_utc_datetime(&test_start_date()),
                reference: Instant::now(),
            }
        }
    }

    #[async_trait::async_trait]
    impl Clock for TestClock {
        fn time(&self) -> DateTime<Utc> {
            self.start_time + self.reference.elapsed()
        }

        fn instant(&self) -> Instant {
            Instant::now()
        }

        async fn sleep_until(&self, instant: tokio::time::Instant) {
            tokio::time::sleep_until(instant).await;
        }
    }

    /// Smoke test for the whole loop: a started session accumulates minutes
    /// from real scheduled ticks, freezes while paused and lands in history
    /// on stop.
    #[tokio::test]
    async fn smoke_test_engine_loop() -> Result<()> {
        *TEST_LOGGING;
        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let (handle, engine_loop) = create_engine(
            store.clone(),
            Arc::new(TestClock::new()),
            Duration::from_millis(100),
            shutdown.clone(),
        );
        let runner = tokio::spawn(engine_loop.run());

        let started = handle
            .send(Command::Start {
                project_name: "Labeling".into(),
            })
            .await?;
        assert!(matches!(started, Outcome::Started(_)));

        tokio::time::sleep(Duration::from_millis(350)).await;
        let status = handle.status().await?.expect("session should be active");
        assert!(status.active_minutes >= 2);

        let paused = handle.send(Command::TogglePause).await?;
        assert_eq!(paused, Outcome::PauseToggled { is_paused: true });
        let frozen_at = handle.status().await?.unwrap().active_minutes;

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(handle.status().await?.unwrap().active_minutes, frozen_at);

        let stopped = handle.send(Command::Stop).await?;
        let Outcome::Stopped(session) = stopped else {
            panic!("expected a stopped session, got {stopped:?}");
        };
        assert!(!session.is_active);
        assert!(session.end_time.is_some());
        assert_eq!(handle.status().await?, None);
        assert_eq!(handle.sessions().await?, vec![session]);

        shutdown.cancel();
        runner.await??;
        Ok(())
    }

    /// A persisted active session picks its tick schedule back up when the
    /// engine restarts, without any new command.
    #[tokio::test]
    async fn restore_resumes_ticking() -> Result<()> {
        *TEST_LOGGING;
        let store = Arc::new(MemoryStore::new());
        let session = Session::begin("Labeling", Utc.from_utc_datetime(&test_start_date()));
        store::set_current_session(&store, Some(&session)).await?;

        let shutdown = CancellationToken::new();
        let (handle, engine_loop) = create_engine(
            store.clone(),
            Arc::new(TestClock::new()),
            Duration::from_millis(100),
            shutdown.clone(),
        );
        let runner = tokio::spawn(engine_loop.run());

        tokio::time::sleep(Duration::from_millis(350)).await;
        let restored = handle.status().await?.expect("session should still exist");
        assert!(restored.active_minutes >= 2);

        shutdown.cancel();
        runner.await??;
        Ok(())
    }
}
