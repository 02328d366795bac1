use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::utils::clock::Clock;

use super::command::EngineMsg;

/// Recurring wake that drives active-minute counting. Each fired tick is sent
/// into the engine channel, so ticks and commands are handled by the same
/// single owner. The schedule advances by fixed wall-clock steps; a tick that
/// fires late does not pull the following ticks forward.
pub(crate) struct TickSchedule {
    sender: mpsc::Sender<EngineMsg>,
    cancel: CancellationToken,
    interval: Duration,
    clock: Arc<dyn Clock>,
}

impl TickSchedule {
    pub fn new(
        sender: mpsc::Sender<EngineMsg>,
        cancel: CancellationToken,
        interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sender,
            cancel,
            interval,
            clock,
        }
    }

    pub async fn run(self) {
        let mut tick_point = self.clock.instant();
        loop {
            tick_point += self.interval;

            tokio::select! {
                // Cancellation stops the schedule; a pending tick is simply
                // never delivered.
                _ = self.cancel.cancelled() => {
                    debug!("Tick schedule cancelled");
                    return;
                }
                _ = self.clock.sleep_until(tick_point) => ()
            }

            if self.sender.send(EngineMsg::Tick).await.is_err() {
                // Engine is gone, nothing left to wake.
                return;
            }
        }
    }
}
