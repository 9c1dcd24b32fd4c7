//! Process-wide registry of active sessions.
//!
//! The registry is the only state shared between session tasks. Its lock
//! guards a single map operation and is never held across an await.

use crate::error::RegistryError;
use crate::session::SessionHandle;
use crowdplay_env::SessionId;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Map from session identity to the running session's handle.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<BTreeMap<SessionId, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped registry for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    // A panic while holding this lock cannot leave the map half-updated
    // (every critical section is a single BTreeMap call), so poisoning is
    // ignored.
    fn map(&self) -> MutexGuard<'_, BTreeMap<SessionId, Arc<SessionHandle>>> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Inserts a session. Fails if one with the same identity is present.
    pub fn register(&self, handle: Arc<SessionHandle>) -> Result<(), RegistryError> {
        let mut map = self.map();
        let id = handle.id();
        if map.contains_key(&id) {
            return Err(RegistryError::AlreadyActive(id));
        }
        map.insert(id, handle);
        Ok(())
    }

    /// Removes whatever session is registered under `id`.
    pub fn unregister(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.map().remove(&id)
    }

    /// Removes `handle` only if it is still the registered session for its
    /// identity. Returns true if it was removed.
    ///
    /// A session that was force-stopped and replaced must not evict its
    /// successor when its own task finally unwinds.
    pub fn unregister_exact(&self, handle: &Arc<SessionHandle>) -> bool {
        let mut map = self.map();
        match map.get(&handle.id()) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                map.remove(&handle.id());
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, id: SessionId) -> Result<Arc<SessionHandle>, RegistryError> {
        self.map().get(&id).cloned().ok_or(RegistryError::NotFound(id))
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.map().contains_key(&id)
    }

    /// Active identities in ascending order.
    pub fn list_active(&self) -> Vec<SessionId> {
        self.map().keys().copied().collect()
    }

    /// Snapshot of every active handle in ascending identity order.
    pub fn handles(&self) -> Vec<Arc<SessionHandle>> {
        self.map().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn handle(id: u64) -> Arc<SessionHandle> {
        let (handle, _rx) = SessionHandle::new(SessionId(id), "tetris", Duration::ZERO);
        Arc::new(handle)
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let registry = SessionRegistry::new();
        registry.register(handle(1)).unwrap();

        assert_eq!(
            registry.register(handle(1)),
            Err(RegistryError::AlreadyActive(SessionId(1)))
        );
        registry.register(handle(2)).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unregister_then_register_again() {
        let registry = SessionRegistry::new();
        registry.register(handle(1)).unwrap();
        assert!(registry.unregister(SessionId(1)).is_some());
        assert!(!registry.contains(SessionId(1)));
        registry.register(handle(1)).unwrap();
    }

    #[test]
    fn test_lookup_missing() {
        let registry = SessionRegistry::new();
        assert_eq!(
            registry.lookup(SessionId(9)).unwrap_err(),
            RegistryError::NotFound(SessionId(9))
        );
    }

    #[test]
    fn test_list_active_is_ordered() {
        let registry = SessionRegistry::new();
        for id in [30, 10, 20] {
            registry.register(handle(id)).unwrap();
        }
        assert_eq!(
            registry.list_active(),
            vec![SessionId(10), SessionId(20), SessionId(30)]
        );
    }

    #[test]
    fn test_unregister_exact_spares_successor() {
        let registry = SessionRegistry::new();
        let old = handle(1);
        registry.register(old.clone()).unwrap();

        // Force-stop path: the entry is dropped and a new session starts
        registry.unregister(SessionId(1));
        let successor = handle(1);
        registry.register(successor.clone()).unwrap();

        assert!(!registry.unregister_exact(&old));
        assert!(registry.contains(SessionId(1)));
        assert!(registry.unregister_exact(&successor));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_registration_admits_exactly_one() {
        let registry = SessionRegistry::shared();
        let threads: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.register(handle(5)).is_ok())
            })
            .collect();

        let admitted = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }
}
