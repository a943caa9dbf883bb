//! Client-side session rotation.
//!
//! An [`ActiveSession`] owns the message buffer of the conversation on screen
//! and the id it is filed under. Closing the conversation persists the
//! buffer and moves to a fresh id:
//!
//! ```text
//! Active ──save_and_reset──▶ Saving ──ok──────▶ Rotated ───────────▶ Active
//!                                   └─failure─▶ SaveFailedFallback ─▶ Active
//! ```
//!
//! At most one rotation runs per session id, and the buffer is either fully
//! cleared or left untouched.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chatfuse_core::error::{Error, Result};
use chatfuse_core::message::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::SaveReceipt;

/// Where finished conversations are sent.
#[async_trait]
pub trait HistoryPersistence: Send + Sync {
    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<SaveReceipt>;
}

/// Where chat messages are sent for an answer.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// `history` is the buffer before the new message.
    async fn send(&self, session_id: &str, text: &str, history: &[Message]) -> Result<Message>;
}

/// What a call to [`ActiveSession::save_and_reset`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// Nothing to save, or another save or send was already in flight.
    Skipped,
    /// Saved; now using the server-issued id.
    Rotated { previous: String, session_id: String },
    /// Save failed; buffer cleared and a locally generated id in use.
    FallbackRotated {
        previous: String,
        session_id: String,
        warning: String,
    },
    /// Logging out; the buffer is gone either way.
    LoggedOut { saved: bool },
}

// ── Single-flight ─────────────────────────────────────────────────────────

/// Admits one holder per key at a time. Clones share the same key set.
#[derive(Clone, Default)]
pub struct SingleFlight {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, or `None` if someone already holds it. The claim is
    /// released when the guard drops.
    pub fn try_acquire(&self, key: &str) -> Option<FlightGuard> {
        let mut keys = lock(&self.in_flight);
        if !keys.insert(key.to_string()) {
            return None;
        }
        Some(FlightGuard {
            in_flight: self.in_flight.clone(),
            key: key.to_string(),
        })
    }

    pub fn is_held(&self, key: &str) -> bool {
        lock(&self.in_flight).contains(key)
    }
}

pub struct FlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.key);
    }
}

/// Lock ignoring poison; every critical section leaves the data consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Active session ────────────────────────────────────────────────────────

struct SessionState {
    session_id: String,
    messages: Vec<Message>,
    is_loading: bool,
    /// Bumped on logout so a send that straddles it drops its result.
    generation: u64,
}

/// Clears `is_loading` on every exit path.
struct LoadingGuard<'a>(&'a Mutex<SessionState>);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        lock(self.0).is_loading = false;
    }
}

pub struct ActiveSession {
    state: Mutex<SessionState>,
    persistence: Arc<dyn HistoryPersistence>,
    transport: Arc<dyn ChatTransport>,
    flights: SingleFlight,
}

impl ActiveSession {
    pub fn new(
        session_id: impl Into<String>,
        persistence: Arc<dyn HistoryPersistence>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            state: Mutex::new(SessionState {
                session_id: session_id.into(),
                messages: Vec::new(),
                is_loading: false,
                generation: 0,
            }),
            persistence,
            transport,
            flights: SingleFlight::new(),
        }
    }

    /// Share a single-flight guard with other views of the same sessions.
    pub fn with_single_flight(mut self, flights: SingleFlight) -> Self {
        self.flights = flights;
        self
    }

    pub fn session_id(&self) -> String {
        lock(&self.state).session_id.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.state).messages.clone()
    }

    /// True while a send or a save is in flight.
    pub fn is_loading(&self) -> bool {
        lock(&self.state).is_loading
    }

    /// Add a message to the buffer without sending it.
    pub fn push(&self, message: Message) {
        lock(&self.state).messages.push(message);
    }

    /// Persist the buffer and move to a fresh session id.
    ///
    /// An expired login (`AuthInvalidated`) is returned as an error with the
    /// buffer intact so the caller can force a logout. Any other persistence
    /// failure falls back to a locally generated id, unless logging out.
    ///
    /// Messages pushed while the save is in flight stay in the buffer under
    /// the new id. Logging out while a send is in flight clears the buffer
    /// without saving and the send's result is discarded.
    pub async fn save_and_reset(&self, is_logging_out: bool) -> Result<RotationOutcome> {
        let previous = self.session_id();
        let Some(_flight) = self.flights.try_acquire(&previous) else {
            debug!(session_id = %previous, "Rotation already in flight");
            return Ok(RotationOutcome::Skipped);
        };

        let snapshot = {
            let mut state = lock(&self.state);
            if state.is_loading && is_logging_out {
                debug!(session_id = %previous, "Logging out over an in-flight send");
                state.messages.clear();
                state.generation += 1;
                return Ok(RotationOutcome::LoggedOut { saved: false });
            }
            if state.is_loading || state.messages.is_empty() {
                return Ok(RotationOutcome::Skipped);
            }
            state.is_loading = true;
            state.messages.clone()
        };
        let _loading = LoadingGuard(&self.state);

        let saved = self
            .persistence
            .save(&previous, &snapshot)
            .await
            .and_then(|receipt| {
                receipt
                    .new_session_id
                    .filter(|id| !id.trim().is_empty())
                    .ok_or_else(|| Error::PersistenceFailure("server did not issue a new session id".into()))
            });

        match saved {
            Ok(session_id) => {
                self.reset_to(&session_id, snapshot.len());
                info!(previous = %previous, session_id = %session_id, "Session rotated");
                if is_logging_out {
                    self.clear_for_logout();
                    Ok(RotationOutcome::LoggedOut { saved: true })
                } else {
                    Ok(RotationOutcome::Rotated { previous, session_id })
                }
            }
            Err(e @ Error::AuthInvalidated(_)) => {
                warn!(session_id = %previous, "Login expired while saving session");
                Err(e)
            }
            Err(e) if is_logging_out => {
                warn!(session_id = %previous, error = %e, "Session save failed during logout");
                self.clear_for_logout();
                Ok(RotationOutcome::LoggedOut { saved: false })
            }
            Err(e) => {
                let session_id = Uuid::new_v4().to_string();
                self.reset_to(&session_id, snapshot.len());
                warn!(previous = %previous, session_id = %session_id, error = %e, "Session save failed, using local session id");
                Ok(RotationOutcome::FallbackRotated {
                    previous,
                    session_id,
                    warning: format!("Session Error: {e}"),
                })
            }
        }
    }

    /// Send `text` and append the reply. On failure the buffer returns to
    /// what it was before the call.
    pub async fn send(&self, text: &str) -> Result<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidRequest("message is required".into()));
        }

        let (session_id, snapshot, generation) = {
            let mut state = lock(&self.state);
            if state.is_loading {
                return Err(Error::InvalidRequest("a request is already in progress".into()));
            }
            state.is_loading = true;
            let snapshot = state.messages.clone();
            state.messages.push(Message::user(text));
            (state.session_id.clone(), snapshot, state.generation)
        };
        let _loading = LoadingGuard(&self.state);

        let result = self.transport.send(&session_id, text, &snapshot).await;
        let mut state = lock(&self.state);
        if state.generation != generation {
            debug!(session_id = %session_id, "Discarding send result after logout");
            return result;
        }
        match result {
            Ok(reply) => {
                state.messages.push(reply.clone());
                Ok(reply)
            }
            Err(e) => {
                drop(state);
                self.handle_send_failure(snapshot);
                Err(e)
            }
        }
    }

    /// Roll the buffer back to `snapshot`. The session id is kept.
    pub fn handle_send_failure(&self, snapshot: Vec<Message>) {
        let mut state = lock(&self.state);
        debug!(
            session_id = %state.session_id,
            dropped = state.messages.len().saturating_sub(snapshot.len()),
            "Rolling back failed send"
        );
        state.messages = snapshot;
    }

    /// Move to `session_id`, dropping the `saved` messages at the front.
    fn reset_to(&self, session_id: &str, saved: usize) {
        let mut state = lock(&self.state);
        state.session_id = session_id.to_string();
        let saved = saved.min(state.messages.len());
        state.messages.drain(..saved);
    }

    fn clear_for_logout(&self) {
        let mut state = lock(&self.state);
        state.messages.clear();
        state.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Persistence with a scripted result and a call counter.
    struct MockPersistence {
        result: Mutex<Option<Result<SaveReceipt>>>,
        calls: Mutex<usize>,
        saved: Mutex<Vec<Message>>,
        gate: Option<Arc<Notify>>,
    }

    impl MockPersistence {
        fn returning(result: Result<SaveReceipt>) -> Self {
            Self {
                result: Mutex::new(Some(result)),
                calls: Mutex::new(0),
                saved: Mutex::new(Vec::new()),
                gate: None,
            }
        }

        fn issuing(new_id: &str) -> Self {
            Self::returning(Ok(SaveReceipt {
                saved_session_id: Some("old".into()),
                new_session_id: Some(new_id.into()),
            }))
        }

        fn gated(new_id: &str, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::issuing(new_id)
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl HistoryPersistence for MockPersistence {
        async fn save(&self, _session_id: &str, messages: &[Message]) -> Result<SaveReceipt> {
            *self.calls.lock().unwrap() += 1;
            *self.saved.lock().unwrap() = messages.to_vec();
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.result
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(Error::Internal("called twice".into())))
        }
    }

    struct MockTransport {
        reply: Mutex<Option<Result<Message>>>,
    }

    impl MockTransport {
        fn replying(result: Result<Message>) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Some(result)),
            })
        }

        fn unused() -> Arc<Self> {
            Arc::new(Self { reply: Mutex::new(None) })
        }
    }

    #[async_trait]
    impl ChatTransport for MockTransport {
        async fn send(&self, _session_id: &str, _text: &str, _history: &[Message]) -> Result<Message> {
            self.reply
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(Error::Internal("no reply scripted".into())))
        }
    }

    /// Transport that holds every send until the gate opens.
    struct GatedTransport {
        gate: Arc<Notify>,
        calls: Mutex<usize>,
    }

    impl GatedTransport {
        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ChatTransport for GatedTransport {
        async fn send(&self, _session_id: &str, _text: &str, _history: &[Message]) -> Result<Message> {
            *self.calls.lock().unwrap() += 1;
            self.gate.notified().await;
            Ok(Message::model("late reply"))
        }
    }

    fn session_with(persistence: Arc<MockPersistence>, messages: usize) -> ActiveSession {
        let session = ActiveSession::new("old", persistence, MockTransport::unused());
        for i in 0..messages {
            session.push(Message::user(format!("m{i}")));
        }
        session
    }

    #[tokio::test]
    async fn successful_save_rotates_to_server_id() {
        let persistence = Arc::new(MockPersistence::issuing("server-new"));
        let session = session_with(persistence.clone(), 3);

        let outcome = session.save_and_reset(false).await.unwrap();
        assert_eq!(
            outcome,
            RotationOutcome::Rotated {
                previous: "old".into(),
                session_id: "server-new".into()
            }
        );
        assert_eq!(session.session_id(), "server-new");
        assert!(session.messages().is_empty());
        assert!(!session.is_loading());
        assert_eq!(persistence.calls(), 1);
    }

    #[tokio::test]
    async fn failed_save_falls_back_to_local_id() {
        let persistence = Arc::new(MockPersistence::returning(Err(Error::PersistenceFailure(
            "database down".into(),
        ))));
        let session = session_with(persistence.clone(), 3);

        let outcome = session.save_and_reset(false).await.unwrap();
        let RotationOutcome::FallbackRotated { previous, session_id, warning } = outcome else {
            panic!("expected fallback rotation");
        };
        assert_eq!(previous, "old");
        assert_ne!(session_id, "old");
        assert!(!session_id.is_empty());
        assert!(warning.contains("database down"));
        assert_eq!(session.session_id(), session_id);
        assert!(session.messages().is_empty());
        assert!(!session.is_loading());
        assert_eq!(persistence.calls(), 1);
    }

    #[tokio::test]
    async fn missing_new_id_counts_as_failure() {
        let persistence = Arc::new(MockPersistence::returning(Ok(SaveReceipt {
            saved_session_id: Some("old".into()),
            new_session_id: None,
        })));
        let session = session_with(persistence, 1);

        let outcome = session.save_and_reset(false).await.unwrap();
        assert!(matches!(outcome, RotationOutcome::FallbackRotated { .. }));
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn auth_failure_keeps_buffer() {
        let persistence = Arc::new(MockPersistence::returning(Err(Error::AuthInvalidated(
            "token expired".into(),
        ))));
        let session = session_with(persistence, 2);

        let err = session.save_and_reset(false).await.unwrap_err();
        assert!(matches!(err, Error::AuthInvalidated(_)));
        assert_eq!(session.session_id(), "old");
        assert_eq!(session.messages().len(), 2);
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn logout_proceeds_even_when_save_fails() {
        let persistence = Arc::new(MockPersistence::returning(Err(Error::PersistenceFailure(
            "down".into(),
        ))));
        let session = session_with(persistence, 2);

        let outcome = session.save_and_reset(true).await.unwrap();
        assert_eq!(outcome, RotationOutcome::LoggedOut { saved: false });
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn empty_buffer_is_a_no_op() {
        let persistence = Arc::new(MockPersistence::issuing("new"));
        let session = session_with(persistence.clone(), 0);

        assert_eq!(session.save_and_reset(false).await.unwrap(), RotationOutcome::Skipped);
        assert_eq!(persistence.calls(), 0);
        assert_eq!(session.session_id(), "old");
    }

    #[tokio::test]
    async fn concurrent_rotations_are_single_flight() {
        let gate = Arc::new(Notify::new());
        let persistence = Arc::new(MockPersistence::gated("new", gate.clone()));
        let session = Arc::new(session_with(persistence.clone(), 3));

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.save_and_reset(false).await })
        };
        // Let the first rotation reach the persistence call.
        while persistence.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(session.is_loading());

        assert_eq!(session.save_and_reset(false).await.unwrap(), RotationOutcome::Skipped);

        gate.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, RotationOutcome::Rotated { .. }));
        assert_eq!(persistence.calls(), 1);
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn shared_single_flight_spans_views() {
        let flights = SingleFlight::new();
        let guard = flights.try_acquire("old").unwrap();

        let persistence = Arc::new(MockPersistence::issuing("new"));
        let session = session_with(persistence.clone(), 1).with_single_flight(flights.clone());
        assert_eq!(session.save_and_reset(false).await.unwrap(), RotationOutcome::Skipped);

        drop(guard);
        assert!(!flights.is_held("old"));
        assert!(matches!(
            session.save_and_reset(false).await.unwrap(),
            RotationOutcome::Rotated { .. }
        ));
        assert!(!flights.is_held("new"));
    }

    #[tokio::test]
    async fn send_appends_reply() {
        let persistence = Arc::new(MockPersistence::issuing("new"));
        let session = ActiveSession::new("s", persistence, MockTransport::replying(Ok(Message::model("hi!"))));

        let reply = session.send("hello").await.unwrap();
        assert_eq!(reply.text(), "hi!");
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text(), "hello");
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn failed_send_rolls_back_without_rotating() {
        let persistence = Arc::new(MockPersistence::issuing("new"));
        let session = ActiveSession::new(
            "s",
            persistence.clone(),
            MockTransport::replying(Err(Error::ServiceUnavailable("llm down".into()))),
        );
        session.push(Message::user("earlier"));

        let err = session.send("hello").await.unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable(_)));
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].text(), "earlier");
        assert_eq!(session.session_id(), "s");
        assert!(!session.is_loading());
        assert_eq!(persistence.calls(), 0);
    }

    #[tokio::test]
    async fn messages_pushed_during_save_survive_rotation() {
        let gate = Arc::new(Notify::new());
        let persistence = Arc::new(MockPersistence::gated("new", gate.clone()));
        let session = Arc::new(session_with(persistence.clone(), 3));

        let rotation = {
            let session = session.clone();
            tokio::spawn(async move { session.save_and_reset(false).await })
        };
        while persistence.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        session.push(Message::user("late"));

        gate.notify_one();
        let outcome = rotation.await.unwrap().unwrap();
        assert!(matches!(outcome, RotationOutcome::Rotated { .. }));
        assert_eq!(persistence.saved.lock().unwrap().len(), 3);
        assert_eq!(session.session_id(), "new");
        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "late");
    }

    #[tokio::test]
    async fn logout_during_send_clears_buffer_and_drops_reply() {
        let gate = Arc::new(Notify::new());
        let persistence = Arc::new(MockPersistence::issuing("new"));
        let transport = Arc::new(GatedTransport {
            gate: gate.clone(),
            calls: Mutex::new(0),
        });
        let session = Arc::new(ActiveSession::new("s", persistence.clone(), transport.clone()));
        session.push(Message::user("earlier"));

        let send = {
            let session = session.clone();
            tokio::spawn(async move { session.send("hello").await })
        };
        while transport.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(session.is_loading());

        let outcome = session.save_and_reset(true).await.unwrap();
        assert_eq!(outcome, RotationOutcome::LoggedOut { saved: false });
        assert!(session.messages().is_empty());
        assert_eq!(persistence.calls(), 0);

        gate.notify_one();
        send.await.unwrap().unwrap();
        assert!(session.messages().is_empty());
        assert!(!session.is_loading());
    }
}
