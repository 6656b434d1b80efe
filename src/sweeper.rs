use crate::abuse::AbuseConfig;
use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;

/// Spawn a background task that forgets idle sessions and stale rate-limit windows
pub fn spawn_session_sweeper(
    state: Arc<AppState>,
    abuse_config: Arc<AbuseConfig>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(every).await;

            let purged = state.challenges.purge_expired().await;
            let windows = match abuse_config.rate_limiter {
                Some(ref limiter) => limiter.cleanup().await,
                None => 0,
            };

            if purged > 0 || windows > 0 {
                tracing::debug!(purged, windows, "Swept expired sessions");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::CaptchaConfig;
    use crate::contact::{ContactConfig, LogSink};
    use crate::state::{ChallengeStore, MemoryChallengeStore};

    #[tokio::test]
    async fn test_sweeper_purges_idle_sessions() {
        let store = Arc::new(MemoryChallengeStore::new(Duration::from_millis(20)));
        let state = Arc::new(AppState::new(
            &CaptchaConfig::default(),
            store.clone(),
            ContactConfig::default(),
            Arc::new(LogSink::new("admin@localhost")),
        ));
        store
            .store_answer(&"01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(), "SWEEPS")
            .await;

        let handle = spawn_session_sweeper(
            state,
            Arc::new(AbuseConfig::default()),
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.abort();

        assert!(store.is_empty().await);
    }
}
