//! Periodic reconnect / re-join driver.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use muxcast_xmpp::Session;

use crate::MucClient;

/// Background task that keeps a [`MucClient`] connected.
///
/// Runs one refresh cycle immediately and then one every `interval`, so a
/// freshly started client joins its expected rooms without waiting out a
/// full period. Stopping cancels at the next wait boundary; a cycle in
/// progress runs to completion.
pub struct Refresher {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Refresher {
    /// Default time between refresh cycles.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(30_000);

    /// Spawns the refresher task.
    pub fn spawn<S: Session>(client: Arc<MucClient<S>>, interval: Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            loop {
                client.refresh().await;
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stopped.changed() => break,
                }
            }
            debug!("refresher stopped");
        });
        Self { stop, task }
    }

    /// Signals the task and waits for it to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}
