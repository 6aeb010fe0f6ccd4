//! Live session bookkeeping.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use storehub_core::AppCallbacks;
use storehub_plugins::SessionOpener;
use storehub_session::{Session, SessionContext, SessionRegistry};
use tracing::debug;

/// Opens every session of the hub, for transports and plugins alike.
///
/// Each session gets the registry attached as its identification listener,
/// so identified apps become reachable for remote operations no matter who
/// opened the connection.
pub struct SessionHub {
    context: Arc<SessionContext>,
    registry: Arc<SessionRegistry>,
    live: Mutex<Vec<Weak<Session>>>,
}

impl SessionHub {
    pub fn new(context: Arc<SessionContext>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            context,
            registry,
            live: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    pub fn open(&self, callbacks: Option<Arc<dyn AppCallbacks>>) -> Arc<Session> {
        let session = Session::new(self.context.clone(), callbacks);
        session.add_listener(self.registry.clone());

        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.retain(|s| s.upgrade().is_some_and(|s| !s.is_destroyed()));
        live.push(session.handle());
        debug!(session = %session.id(), live = live.len(), "Session opened");
        session
    }

    /// Sessions that are still referenced and not destroyed.
    pub fn live_sessions(&self) -> Vec<Arc<Session>> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|s| !s.is_destroyed())
            .collect()
    }

    /// Destroy every live session, returning how many were closed.
    pub async fn destroy_all(&self) -> usize {
        let sessions: Vec<Arc<Session>> = {
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            live.drain(..).filter_map(|s| s.upgrade()).collect()
        };
        let mut closed = 0;
        for session in sessions {
            if !session.is_destroyed() {
                session.destroy_session().await;
                closed += 1;
            }
        }
        closed
    }
}

#[async_trait]
impl SessionOpener for SessionHub {
    async fn open_session(&self, callbacks: Option<Arc<dyn AppCallbacks>>) -> Arc<Session> {
        self.open(callbacks)
    }
}
