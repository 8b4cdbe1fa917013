use crate::error::AppError;
use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;

const WATCH_INTERVAL: Duration = Duration::from_secs(4);

/// Spawn the background loop that sweeps every room and drives pending
/// transitions: completed rounds whose advance trigger was lost, generation
/// that never got kicked, stalled generation flags. This is the pull half of
/// the duplicated push/pull progress scheme, so a single missed event can
/// delay a transition by at most one sweep.
pub fn spawn_round_watcher(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(WATCH_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            for code in state.store.list_codes().await {
                match state.check_progress(&code).await {
                    Ok(()) => {}
                    // The room was archived or emptied mid-sweep.
                    Err(AppError::RoomNotFound) => {}
                    Err(err) => {
                        tracing::warn!(code, %err, "watcher progress check failed");
                    }
                }
            }
        }
    });
}
