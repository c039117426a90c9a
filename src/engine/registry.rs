//! Process-wide map of session ids to sessions

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, info};

use super::capability::DocumentHandle;
use super::error::EngineError;
use super::session::EngineSession;
use super::types::SessionId;
use super::worker::TaskWorker;

type HandleFactory<H> = Box<dyn Fn() -> H + Send + Sync>;

/// A registered session and the worker that runs its background operations
pub struct SessionEntry<H: DocumentHandle> {
    pub session: Arc<EngineSession<H>>,
    pub worker: Arc<TaskWorker>,
}

impl<H: DocumentHandle> Clone for SessionEntry<H> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            worker: Arc::clone(&self.worker),
        }
    }
}

pub struct EngineRegistry<H: DocumentHandle> {
    sessions: RwLock<HashMap<SessionId, SessionEntry<H>>>,
    factory: HandleFactory<H>,
    next_id: AtomicU64,
}

impl<H: DocumentHandle + 'static> EngineRegistry<H> {
    /// `factory` builds a fresh handle for every new session
    pub fn new(factory: impl Fn() -> H + Send + Sync + 'static) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            factory: Box::new(factory),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn create(&self) -> Result<SessionId, EngineError> {
        let id = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let worker = TaskWorker::spawn(format!("folio-{id}"))?;
        let entry = SessionEntry {
            session: Arc::new(EngineSession::new(id, (self.factory)())),
            worker: Arc::new(worker),
        };

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, entry);
        info!("Created {id}");
        Ok(id)
    }

    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Arc<EngineSession<H>>> {
        self.entry(id).map(|entry| entry.session)
    }

    #[must_use]
    pub fn entry(&self, id: SessionId) -> Option<SessionEntry<H>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Remove and tear down a session. Returns `false` for unknown ids.
    pub fn destroy(&self, id: SessionId) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);

        let Some(entry) = removed else {
            return false;
        };
        if !entry.session.try_teardown() {
            debug!("{id}: busy, closing after its running operation");
            let session = Arc::clone(&entry.session);
            drop(entry.worker.submit(move || session.teardown()));
        }
        entry.worker.detach();
        info!("Destroyed {id}");
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy every session
    pub fn clear(&self) {
        let drained: Vec<_> = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (id, entry) in drained {
            entry.session.teardown();
            info!("Destroyed {id}");
        }
    }
}
