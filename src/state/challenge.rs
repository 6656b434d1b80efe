//! Challenge store and verifier
//!
//! One live answer per visitor session. Issuing a challenge overwrites the
//! previous answer; verifying never consumes it, so a visitor can retry with
//! the image they still see.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::AppState;
use crate::captcha::CaptchaError;
use crate::session::fingerprint;
use crate::types::SessionId;

/// Storage for the current answer of each session
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Replace the session's answer (last write wins)
    async fn store_answer(&self, session: &SessionId, answer: &str);

    /// The session's live answer, if it has one
    async fn current_answer(&self, session: &SessionId) -> Option<String>;

    /// Drop answers of expired sessions, returning how many were removed
    async fn purge_expired(&self) -> usize;
}

#[derive(Debug, Clone)]
struct StoredAnswer {
    answer: String,
    last_seen: Instant,
}

/// Sessions kept by [`MemoryChallengeStore::new`]
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// In-process [`ChallengeStore`] with an idle timeout per session
///
/// Holds at most `max_sessions` answers. When full, a new session pushes out
/// the one that has gone unused the longest.
#[derive(Debug, Clone)]
pub struct MemoryChallengeStore {
    entries: Arc<RwLock<HashMap<SessionId, StoredAnswer>>>,
    idle_timeout: Duration,
    max_sessions: usize,
}

impl MemoryChallengeStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self::with_max_sessions(idle_timeout, DEFAULT_MAX_SESSIONS)
    }

    pub fn with_max_sessions(idle_timeout: Duration, max_sessions: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            idle_timeout,
            max_sessions: max_sessions.max(1),
        }
    }

    /// Number of sessions currently holding an answer
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn store_answer(&self, session: &SessionId, answer: &str) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        if !entries.contains_key(session) && entries.len() >= self.max_sessions {
            entries.retain(|_, entry| now.duration_since(entry.last_seen) < self.idle_timeout);

            if entries.len() >= self.max_sessions {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_seen)
                    .map(|(id, _)| id.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                    tracing::debug!(
                        evicted = %fingerprint(&oldest),
                        max_sessions = self.max_sessions,
                        "Challenge store full, evicted least recently used session"
                    );
                }
            }
        }

        entries.insert(
            session.clone(),
            StoredAnswer {
                answer: answer.to_string(),
                last_seen: now,
            },
        );
    }

    async fn current_answer(&self, session: &SessionId) -> Option<String> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let entry = entries.get_mut(session)?;
        if now.duration_since(entry.last_seen) >= self.idle_timeout {
            entries.remove(session);
            return None;
        }
        entry.last_seen = now;
        Some(entry.answer.clone())
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.last_seen) < self.idle_timeout);
        before - entries.len()
    }
}

/// Result of checking a submitted answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Passed,
    /// Session expired, or the image was never loaded
    NoActiveChallenge,
    AnswerMismatch,
}

impl VerifyOutcome {
    pub fn passed(self) -> bool {
        self == VerifyOutcome::Passed
    }
}

/// Check `submitted` against the session's live answer.
pub async fn verify_outcome(
    store: &dyn ChallengeStore,
    session: &SessionId,
    submitted: &str,
) -> VerifyOutcome {
    match store.current_answer(session).await {
        None => VerifyOutcome::NoActiveChallenge,
        Some(expected) if answers_match(&expected, submitted) => VerifyOutcome::Passed,
        Some(_) => VerifyOutcome::AnswerMismatch,
    }
}

/// Yes/no form of [`verify_outcome`].
pub async fn verify(store: &dyn ChallengeStore, session: &SessionId, submitted: &str) -> bool {
    verify_outcome(store, session, submitted).await.passed()
}

/// Case-insensitive comparison after trimming surrounding whitespace
fn answers_match(expected: &str, submitted: &str) -> bool {
    let expected = expected.trim().to_ascii_uppercase();
    let submitted = submitted.trim().to_ascii_uppercase();
    constant_time_eq(expected.as_bytes(), submitted.as_bytes())
}

/// Constant-time byte comparison so response timing does not leak the answer
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

impl AppState {
    /// Render a challenge for `session` and return its PNG.
    ///
    /// The answer is stored before the image is handed back, so any image a
    /// client receives can already be verified.
    pub async fn issue_challenge(&self, session: &SessionId) -> Result<Vec<u8>, CaptchaError> {
        let generator = self
            .captcha
            .clone()
            .ok_or_else(|| CaptchaError::FontUnavailable {
                path: self.font_path.clone(),
                reason: "font was not loaded at start-up".to_string(),
            })?;

        // Rasterising and PNG encoding are CPU-bound; keep them off the async workers
        let challenge = tokio::task::spawn_blocking(move || generator.generate())
            .await
            .map_err(|e| CaptchaError::RenderTask(e.to_string()))??;
        self.challenges
            .store_answer(session, &challenge.answer)
            .await;

        tracing::debug!(
            session = %fingerprint(session),
            png_bytes = challenge.png.len(),
            "Issued CAPTCHA challenge"
        );
        Ok(challenge.png)
    }

    /// Check a submitted answer for `session`.
    pub async fn verify_challenge(&self, session: &SessionId, submitted: &str) -> VerifyOutcome {
        let outcome = verify_outcome(self.challenges.as_ref(), session, submitted).await;
        if !outcome.passed() {
            tracing::debug!(session = %fingerprint(session), ?outcome, "CAPTCHA verification failed");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(n: u8) -> SessionId {
        format!("01ARZ3NDEKTSV4RRFFQ69G5FA{}", n)
    }

    fn store() -> MemoryChallengeStore {
        MemoryChallengeStore::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_no_challenge_fails() {
        let store = store();
        assert_eq!(
            verify_outcome(&store, &session(1), "ANYTEXT").await,
            VerifyOutcome::NoActiveChallenge
        );
        assert!(!verify(&store, &session(1), "ANYTEXT").await);
    }

    #[tokio::test]
    async fn test_case_insensitive_and_trimmed() {
        let store = store();
        store.store_answer(&session(1), "QWERTY").await;

        for attempt in ["QWERTY", "qwerty", "QweRty", "  qwerty\n"] {
            assert!(verify(&store, &session(1), attempt).await, "{attempt:?}");
        }
        assert_eq!(
            verify_outcome(&store, &session(1), "QWERT").await,
            VerifyOutcome::AnswerMismatch
        );
        assert!(!verify(&store, &session(1), "QW ERTY").await);
        assert!(!verify(&store, &session(1), "").await);
    }

    #[tokio::test]
    async fn test_overwrite_invalidates_previous_answer() {
        let store = store();
        store.store_answer(&session(1), "AAAAAA").await;
        store.store_answer(&session(1), "BBBBBB").await;

        assert!(!verify(&store, &session(1), "AAAAAA").await);
        assert!(verify(&store, &session(1), "BBBBBB").await);
    }

    #[tokio::test]
    async fn test_replay_is_allowed() {
        let store = store();
        store.store_answer(&session(1), "REPLAY").await;

        assert!(verify(&store, &session(1), "replay").await);
        assert!(verify(&store, &session(1), "replay").await);
        // A wrong guess does not burn the answer either
        assert!(!verify(&store, &session(1), "WRONGO").await);
        assert!(verify(&store, &session(1), "REPLAY").await);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = store();
        store.store_answer(&session(1), "XXXXXX").await;
        store.store_answer(&session(2), "YYYYYY").await;

        assert!(!verify(&store, &session(1), "YYYYYY").await);
        assert!(!verify(&store, &session(2), "XXXXXX").await);
        assert!(!verify(&store, &session(3), "XXXXXX").await);
    }

    #[tokio::test]
    async fn test_idle_session_expires() {
        let store = MemoryChallengeStore::new(Duration::from_millis(50));
        store.store_answer(&session(1), "EXPIRE").await;
        assert!(verify(&store, &session(1), "EXPIRE").await);

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(
            verify_outcome(&store, &session(1), "EXPIRE").await,
            VerifyOutcome::NoActiveChallenge
        );
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryChallengeStore::new(Duration::from_millis(50));
        store.store_answer(&session(1), "OLDONE").await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        store.store_answer(&session(2), "NEWONE").await;

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 1);
        assert!(verify(&store, &session(2), "NEWONE").await);
    }

    #[tokio::test]
    async fn test_full_store_evicts_least_recently_used() {
        let store = MemoryChallengeStore::with_max_sessions(Duration::from_secs(60), 2);
        store.store_answer(&session(1), "FIRSTA").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.store_answer(&session(2), "SECOND").await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Touching session 1 makes session 2 the stalest
        assert!(verify(&store, &session(1), "FIRSTA").await);
        tokio::time::sleep(Duration::from_millis(5)).await;

        store.store_answer(&session(3), "THIRDA").await;
        assert_eq!(store.len().await, 2);
        assert!(verify(&store, &session(1), "FIRSTA").await);
        assert!(verify(&store, &session(3), "THIRDA").await);
        assert_eq!(
            verify_outcome(&store, &session(2), "SECOND").await,
            VerifyOutcome::NoActiveChallenge
        );

        // Replacing an existing session's answer never evicts anyone
        store.store_answer(&session(3), "FOURTH").await;
        assert_eq!(store.len().await, 2);
        assert!(verify(&store, &session(1), "FIRSTA").await);
    }

    #[tokio::test]
    async fn test_full_store_drops_expired_before_evicting() {
        let store = MemoryChallengeStore::with_max_sessions(Duration::from_millis(50), 2);
        store.store_answer(&session(1), "STALEA").await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        store.store_answer(&session(2), "LIVEAA").await;
        store.store_answer(&session(3), "LIVEBB").await;

        assert_eq!(store.len().await, 2);
        assert!(verify(&store, &session(2), "LIVEAA").await);
        assert!(verify(&store, &session(3), "LIVEBB").await);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
        assert!(!constant_time_eq(b"", b"x"));
        assert!(constant_time_eq(b"", b""));
    }
}
