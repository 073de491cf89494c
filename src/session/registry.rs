use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{CmdqueueError, Result};
use crate::session::Session;

/// Owns the live sessions and their lifecycle.
///
/// Sessions are created explicitly and torn down with [`close`](Self::close);
/// closing one cancels its queued jobs and signals its running processes.
#[derive(Debug)]
pub struct SessionRegistry {
    defaults: SessionConfig,
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl SessionRegistry {
    pub fn new(defaults: SessionConfig) -> Result<Self> {
        defaults.validate()?;
        Ok(Self {
            defaults,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Create a session using the registry defaults.
    pub async fn create(&self) -> Result<Session> {
        self.create_with(self.defaults.clone()).await
    }

    pub async fn create_with(&self, config: SessionConfig) -> Result<Session> {
        let session = Session::new(config)?;
        self.sessions
            .write()
            .await
            .insert(session.id(), session.clone());
        tracing::info!(
            session = %session.id(),
            max_concurrent = session.config().max_concurrent,
            "Session created"
        );
        Ok(session)
    }

    pub async fn get(&self, id: Uuid) -> Result<Session> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(CmdqueueError::SessionNotFound(id))
    }

    /// Remove a session and shut it down.
    pub async fn close(&self, id: Uuid) -> Result<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(&id)
            .ok_or(CmdqueueError::SessionNotFound(id))?;
        session.shutdown();
        Ok(())
    }

    /// Shut down every session. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let sessions: Vec<Session> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.shutdown();
        }
        sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_get() {
        let registry = SessionRegistry::new(SessionConfig::default()).unwrap();
        let session = registry.create().await.unwrap();

        let fetched = registry.get(session.id()).await.unwrap();
        assert_eq!(fetched.id(), session.id());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn get_unknown_session() {
        let registry = SessionRegistry::new(SessionConfig::default()).unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(
            registry.get(id).await,
            Err(CmdqueueError::SessionNotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn close_removes_and_shuts_down() {
        let registry = SessionRegistry::new(SessionConfig::default()).unwrap();
        let session = registry.create().await.unwrap();

        registry.close(session.id()).await.unwrap();

        assert!(session.is_closed());
        assert!(registry.is_empty().await);
        assert!(matches!(
            session.enqueue(0),
            Err(CmdqueueError::SessionClosed)
        ));
        assert!(matches!(
            registry.close(session.id()).await,
            Err(CmdqueueError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn close_all_sessions() {
        let registry = SessionRegistry::new(SessionConfig::default()).unwrap();
        let a = registry.create().await.unwrap();
        let b = registry
            .create_with(SessionConfig::new(4))
            .await
            .unwrap();
        assert_eq!(b.config().max_concurrent, 4);

        assert_eq!(registry.close_all().await, 2);
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(registry.is_empty().await);
    }

    #[test]
    fn rejects_invalid_defaults() {
        assert!(matches!(
            SessionRegistry::new(SessionConfig::new(0)),
            Err(CmdqueueError::InvalidConfig(_))
        ));
    }
}
