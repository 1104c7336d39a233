//! Process-wide map of active calls.

use crate::session::SessionHandle;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("call {0} already has an active session")]
    AlreadyActive(String),
}

/// Active sessions keyed by call id.
///
/// Insert happens on the transport's start signal and removal on stop or
/// socket close. Removal is keyed by both call id and session id so a late
/// close from an old socket cannot tear down a newer session that reused the
/// same call id.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session. At most one session may exist per call id.
    pub async fn insert(&self, handle: SessionHandle) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(handle.call_id()) {
            return Err(RegistryError::AlreadyActive(handle.call_id().to_string()));
        }
        tracing::debug!(call_id = %handle.call_id(), "session registered");
        sessions.insert(handle.call_id().to_string(), handle);
        Ok(())
    }

    pub async fn get(&self, call_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(call_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Clones of every registered handle.
    pub async fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Removes and stops the session for `call_id`, provided it is still the
    /// session identified by `session_id`.
    ///
    /// Returns `true` if this call removed it. Ending an already-ended call is
    /// a no-op that returns `false`.
    pub async fn end_session(&self, call_id: &str, session_id: Uuid) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(call_id) {
                Some(handle) if handle.session_id() == session_id => sessions.remove(call_id),
                _ => None,
            }
        };
        match removed {
            Some(handle) => {
                handle.stop().await;
                tracing::info!(call_id = %call_id, "session ended");
                true
            }
            None => {
                tracing::debug!(call_id = %call_id, "session already ended");
                false
            }
        }
    }

    /// Stops every registered session. Used on shutdown.
    pub async fn shutdown_all(&self) -> usize {
        let drained: Vec<SessionHandle> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &drained {
            handle.stop().await;
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CallSession, CallSettings};
    use async_trait::async_trait;
    use callbridge_types::{AgentProfile, ConversationState, Turn};
    use callbridge_voice::{
        RecognitionConfig, RecognitionStream, ResponseGenerator, SpeechRecognizer,
        SpeechSynthesizer, VoiceError, VoicePorts,
    };
    use tokio::sync::mpsc;

    struct Inert;

    #[async_trait]
    impl SpeechRecognizer for Inert {
        async fn open(&self, _: RecognitionConfig) -> Result<RecognitionStream, VoiceError> {
            Err(VoiceError::Stt("offline".to_string()))
        }
    }

    #[async_trait]
    impl ResponseGenerator for Inert {
        async fn generate(&self, _: &[Turn], _: &str) -> Result<String, VoiceError> {
            Ok(String::new())
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for Inert {
        async fn synthesize(&self, _: &str, _: &str) -> Result<Vec<u8>, VoiceError> {
            Ok(Vec::new())
        }
    }

    fn session(call_id: &str) -> (SessionHandle, mpsc::Receiver<crate::protocol::OutboundMessage>) {
        let ports = VoicePorts {
            recognizer: Arc::new(Inert),
            generator: Arc::new(Inert),
            synthesizer: Arc::new(Inert),
        };
        let (tx, rx) = mpsc::channel(8);
        let handle = CallSession::spawn(
            call_id,
            AgentProfile::default(),
            ports,
            Arc::new(CallSettings::default()),
            tx,
        );
        (handle, rx)
    }

    #[tokio::test]
    async fn one_session_per_call_id() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = session("CA1");
        let (second, _rx2) = session("CA1");

        registry.insert(first).await.unwrap();
        assert_eq!(
            registry.insert(second).await,
            Err(RegistryError::AlreadyActive("CA1".to_string()))
        );
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn end_session_is_idempotent() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = session("CA1");
        let id = handle.session_id();
        registry.insert(handle.clone()).await.unwrap();

        assert!(registry.end_session("CA1", id).await);
        assert!(handle.wait_for_state(ConversationState::Ended).await);
        assert!(!registry.end_session("CA1", id).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn stale_session_id_does_not_remove_newer_session() {
        let registry = SessionRegistry::new();
        let (old, _rx1) = session("CA1");
        let old_id = old.session_id();
        registry.insert(old).await.unwrap();
        assert!(registry.end_session("CA1", old_id).await);

        let (new, _rx2) = session("CA1");
        let new_id = new.session_id();
        registry.insert(new).await.unwrap();

        assert!(!registry.end_session("CA1", old_id).await);
        assert_eq!(registry.get("CA1").await.map(|h| h.session_id()), Some(new_id));
    }

    #[tokio::test]
    async fn shutdown_stops_everything() {
        let registry = SessionRegistry::new();
        let (a, _rx1) = session("CA1");
        let (b, _rx2) = session("CA2");
        registry.insert(a.clone()).await.unwrap();
        registry.insert(b.clone()).await.unwrap();
        assert_eq!(registry.len().await, 2);

        assert_eq!(registry.shutdown_all().await, 2);
        assert!(a.wait_for_state(ConversationState::Ended).await);
        assert!(b.wait_for_state(ConversationState::Ended).await);
        assert!(registry.is_empty().await);
    }
}
