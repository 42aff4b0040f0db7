use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use crate::session::Session;

/// Live sessions by charge point identity.
#[derive(Clone, Default)]
pub struct Registry {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session for `identity`, created if absent. The flag is true for
    /// a new session.
    pub fn session(&self, identity: &str) -> (Session, bool) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        match sessions.get(identity) {
            Some(session) => (session.clone(), false),
            None => {
                let session = Session::new(identity);
                sessions.insert(identity.to_owned(), session.clone());
                (session, true)
            }
        }
    }

    pub fn get(&self, identity: &str) -> Option<Session> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    pub fn remove(&self, identity: &str) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity);
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_reuses_session() {
        let registry = Registry::new();
        let (first, fresh) = registry.session("CP_1");
        assert!(fresh);
        first.with_state(|s| s.boot_count = 3);

        let (second, fresh) = registry.session("CP_1");
        assert!(!fresh);
        assert_eq!(second.snapshot().boot_count, 3);

        registry.remove("CP_1");
        assert!(registry.is_empty());
        assert!(registry.session("CP_1").1);
    }
}
