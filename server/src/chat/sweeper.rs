//! Background trigger for the idle-room sweep.
//!
//! The sweep itself runs inside the dispatcher; this task only wakes it up.

use std::time::Duration;

use tokio::task::JoinHandle;

use super::dispatcher::DispatcherHandle;

/// Spawn a task that asks the dispatcher to sweep idle rooms every `interval`.
/// Exits once the dispatcher is gone.
pub fn spawn_idle_room_sweeper(dispatcher: DispatcherHandle, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // skip the immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match dispatcher.sweep().await {
                Ok(removed) if !removed.is_empty() => {
                    tracing::info!(
                        "Idle room sweep: removed {} rooms ({})",
                        removed.len(),
                        removed.join(", ")
                    );
                }
                Ok(_) => {
                    tracing::debug!("Idle room sweep: nothing to remove");
                }
                Err(e) => {
                    tracing::warn!("Idle room sweep stopped: {}", e);
                    break;
                }
            }
        }
    })
}
