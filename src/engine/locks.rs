//! Keyed async mutexes serializing work per community-scoped key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

type Key = (String, String);

/// One async mutex per `(community, key)`, where the key is a ticket
/// channel or, for ticket creation, the creating user.
///
/// The guard is owned so it can be held across every await of a transition.
#[derive(Default)]
pub struct TicketLocks {
    locks: Mutex<HashMap<Key, Arc<tokio::sync::Mutex<()>>>>,
}

impl TicketLocks {
    /// Wait for exclusive access to a ticket channel.
    pub async fn acquire(&self, community_id: &str, channel_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                locks
                    .entry((community_id.to_owned(), channel_id.to_owned()))
                    .or_default(),
            )
        };
        lock.lock_owned().await
    }

    /// Drop the lock of a deleted channel once nobody holds or waits on it.
    pub fn release(&self, community_id: &str, channel_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (community_id.to_owned(), channel_id.to_owned());
        if locks.get(&key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&key);
        }
    }

    /// Number of tracked channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no channel is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
