use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::error;
use uuid::Uuid;

use hirewire_types::models::Role;

/// Reference-counted online state. One actor may hold several live
/// connections at once (multiple tabs); presence means "any connection
/// open", and only the 0↔1 edges are worth broadcasting.
///
/// Pure in-memory: operations never fail and never block on I/O. A violated
/// refcount invariant is a programming defect — it is logged and asserted,
/// not silently absorbed into client-visible state.
#[derive(Clone)]
pub struct PresenceRegistry {
    refcounts: Arc<Mutex<HashMap<(Role, Uuid), usize>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            refcounts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count one more live connection for the actor. Returns true exactly
    /// when the actor just came online (refcount 0 → 1); the caller
    /// broadcasts the transition then and only then.
    pub fn acquire(&self, role: Role, actor_id: Uuid) -> bool {
        let mut counts = self.refcounts.lock().expect("presence lock poisoned");
        let count = counts.entry((role, actor_id)).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Drop one live connection. Returns true exactly when the actor just
    /// went offline (refcount 1 → 0); the entry is removed at zero.
    pub fn release(&self, role: Role, actor_id: Uuid) -> bool {
        let mut counts = self.refcounts.lock().expect("presence lock poisoned");
        match counts.get_mut(&(role, actor_id)) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                counts.remove(&(role, actor_id));
                true
            }
            None => {
                error!("presence release for {} {} with no entry", role, actor_id);
                debug_assert!(false, "presence release without a matching acquire");
                false
            }
        }
    }

    /// All actors of one role with at least one live connection, used to
    /// bootstrap a newly connected client's view of who is online.
    pub fn snapshot(&self, role: Role) -> Vec<Uuid> {
        let counts = self.refcounts.lock().expect("presence lock poisoned");
        counts
            .keys()
            .filter(|(r, _)| *r == role)
            .map(|(_, id)| *id)
            .collect()
    }
}
