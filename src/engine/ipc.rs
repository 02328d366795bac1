//! Command channel between short-lived surfaces and the daemon. The daemon
//! owns the only engine, so every session mutation has to reach it; this
//! module carries commands over a local socket into the same channel the tick
//! schedule feeds, which is what keeps them serialized.
//!
//! The wire format is newline-delimited JSON: one [Command] per line, answered
//! with one `Result<Outcome, String>` per line.
//!
//! On Windows detached daemons don't expose a socket yet, so `send` reports no
//! daemon and callers run a local engine instead. Same limitation as signal
//! handling in `shutdown`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use super::command::{Command, EngineHandle, Outcome};

pub fn socket_path(app_dir: &Path) -> PathBuf {
    app_dir.join("daemon.sock")
}

/// Accepts command connections until shutdown. Each decoded command goes
/// through `handle`, so it queues behind ticks and other commands.
#[cfg(unix)]
pub async fn serve(path: PathBuf, handle: EngineHandle, shutdown: CancellationToken) -> Result<()> {
    use tokio::net::UnixListener;
    use tracing::{info, warn};

    // A previous daemon killed without cleanup leaves the file behind.
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    info!("Listening for commands on {path:?}");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let handle = handle.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, handle).await {
                        warn!("Command connection failed {e:?}");
                    }
                });
            }
        }
    }
    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[cfg(unix)]
async fn serve_connection(stream: tokio::net::UnixStream, handle: EngineHandle) -> Result<()> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tracing::debug;

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let command: Command = serde_json::from_str(&line)?;
        debug!("Received command {command:?}");
        let reply: Result<Outcome, String> = handle.send(command).await.map_err(|e| format!("{e:#}"));
        let mut encoded = serde_json::to_vec(&reply)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Sends one command to the daemon behind `path`. `Ok(None)` means no daemon
/// is listening there; the caller decides whether to run a local engine.
#[cfg(unix)]
pub async fn send(path: &Path, command: &Command) -> Result<Option<Outcome>> {
    use anyhow::{anyhow, bail};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixStream;

    let mut stream = match UnixStream::connect(path).await {
        Ok(stream) => stream,
        // Covers the missing file and the stale socket of a dead daemon.
        Err(_) => return Ok(None),
    };

    let mut encoded = serde_json::to_vec(command)?;
    encoded.push(b'\n');
    stream.write_all(&encoded).await?;
    stream.flush().await?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        bail!("Daemon closed the connection without replying");
    }
    let reply: Result<Outcome, String> = serde_json::from_str(&line)?;
    reply
        .map(Some)
        .map_err(|message| anyhow!("Daemon failed to execute the command: {message}"))
}

#[cfg(not(unix))]
pub async fn serve(
    _path: PathBuf,
    _handle: EngineHandle,
    shutdown: CancellationToken,
) -> Result<()> {
    shutdown.cancelled().await;
    Ok(())
}

#[cfg(not(unix))]
pub async fn send(_path: &Path, _command: &Command) -> Result<Option<Outcome>> {
    Ok(None)
}

#[cfg(all(test, unix))]
mod tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    use crate::{
        engine::{
            command::{Command, Outcome},
            create_engine,
        },
        store::{self, store::MemoryStore},
        utils::{clock::DefaultClock, logging::TEST_LOGGING},
    };

    use super::{send, serve, socket_path};

    /// Binding is async to the test; retry until the server picks up.
    async fn send_when_ready(
        path: &std::path::Path,
        command: &Command,
    ) -> Result<Option<Outcome>> {
        for _ in 0..50 {
            if let Some(outcome) = send(path, command).await? {
                return Ok(Some(outcome));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(None)
    }

    /// All mutations issued over the socket land in the daemon's one engine:
    /// its tick schedule advances the started session, and a remote stop
    /// disarms that schedule so nothing writes the session back afterwards.
    #[tokio::test]
    async fn remote_commands_share_the_daemon_engine() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let socket = socket_path(dir.path());
        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let (handle, engine_loop) = create_engine(
            store.clone(),
            Arc::new(DefaultClock),
            Duration::from_millis(50),
            shutdown.clone(),
        );
        let runner = tokio::spawn(engine_loop.run());
        let server = tokio::spawn(serve(socket.clone(), handle, shutdown.clone()));

        let started = send_when_ready(
            &socket,
            &Command::Start {
                project_name: "Labeling".into(),
            },
        )
        .await?;
        assert!(matches!(started, Some(Outcome::Started(_))));

        tokio::time::sleep(Duration::from_millis(180)).await;
        let Some(Outcome::Stopped(session)) = send(&socket, &Command::Stop).await? else {
            panic!("stop should reach the daemon engine");
        };
        assert!(!session.is_active);
        assert!(session.active_minutes >= 2);

        // The stop disarmed the daemon's schedule; the stopped session must
        // not reappear as current.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store::current_session(&store).await?, None);
        assert_eq!(store::sessions(&store).await?, vec![session]);

        shutdown.cancel();
        server.await??;
        runner.await??;
        Ok(())
    }

    /// Without a listening daemon `send` reports `None` so surfaces know to
    /// run the engine themselves.
    #[tokio::test]
    async fn send_reports_missing_daemon() -> Result<()> {
        let dir = tempdir()?;
        let socket = socket_path(dir.path());
        assert_eq!(send(&socket, &Command::GetStatus).await?, None);
        Ok(())
    }

    /// A stale socket file from a killed daemon reads as "no daemon", and the
    /// next daemon rebinds over it.
    #[tokio::test]
    async fn stale_socket_is_reclaimed() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let socket = socket_path(dir.path());
        drop(tokio::net::UnixListener::bind(&socket)?);
        assert_eq!(send(&socket, &Command::GetStatus).await?, None);

        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let (handle, engine_loop) = create_engine(
            store.clone(),
            Arc::new(DefaultClock),
            Duration::from_millis(50),
            shutdown.clone(),
        );
        let runner = tokio::spawn(engine_loop.run());
        let server = tokio::spawn(serve(socket.clone(), handle, shutdown.clone()));

        let status = send_when_ready(&socket, &Command::GetStatus).await?;
        assert_eq!(status, Some(Outcome::Status(None)));

        shutdown.cancel();
        server.await??;
        runner.await??;
        Ok(())
    }
}
