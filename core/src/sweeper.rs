// Expiry sweeper
//
// Background task that reclaims idle sessions on a fixed interval. The first
// sweep happens one interval after spawn. Cancellation is honored between
// ticks; a sweep already in progress runs to completion.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manager::SessionManager;

pub struct ExpirySweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ExpirySweeper {
    pub fn spawn(manager: Arc<SessionManager>, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            info!(
                target: "expiry_sweeper",
                interval_secs = interval.as_secs(),
                "Session cleanup task started"
            );
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        let reclaimed = manager.cleanup_expired_sessions().await;
                        if reclaimed > 0 {
                            info!(target: "expiry_sweeper", reclaimed = reclaimed, "Expired sessions reclaimed");
                        } else {
                            debug!(target: "expiry_sweeper", "No expired sessions");
                        }
                    }
                }
            }

            info!(target: "expiry_sweeper", "Session cleanup task stopped");
        });

        Self { token, handle }
    }

    /// Token that stops the sweeper when cancelled
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel and wait for the task to exit
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(target: "expiry_sweeper", error = %e, "Cleanup task ended abnormally");
        }
    }
}
