//! In-memory conversation store.
//!
//! Messages are linked through `parent_message_id`; a request's context is
//! rebuilt by walking those links back from the message the front-end names.
//! The store is bounded and evicts the oldest insertions first.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::types::Role;

/// A message kept for context reconstruction.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub parent_message_id: Option<String>,
}

struct StoreInner {
    messages: HashMap<String, StoredMessage>,
    order: VecDeque<String>,
}

/// Bounded, thread-safe message store.
pub struct MessageStore {
    inner: Mutex<StoreInner>,
    capacity: usize,
}

impl MessageStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                messages: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        // A panic while holding the lock leaves the map consistent; keep serving.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace a message, evicting the oldest entries past capacity.
    pub fn insert(&self, message: StoredMessage) {
        let mut inner = self.lock();
        let id = message.id.clone();
        if inner.messages.insert(id.clone(), message).is_none() {
            inner.order.push_back(id);
        }
        while inner.messages.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.messages.remove(&oldest);
                }
                None => break,
            }
        }
    }

    #[cfg(test)]
    fn get(&self, id: &str) -> Option<StoredMessage> {
        self.lock().messages.get(id).cloned()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().messages.len()
    }

    /// Up to `limit` ancestors ending at `parent_id`, oldest first.
    ///
    /// Walking stops at a missing link, so evicted history silently shortens
    /// the context instead of failing the request.
    pub fn history(&self, parent_id: Option<&str>, limit: usize) -> Vec<StoredMessage> {
        let inner = self.lock();
        let mut chain = Vec::new();
        let mut next = parent_id.map(str::to_string);

        while let Some(id) = next {
            if chain.len() >= limit {
                break;
            }
            let Some(message) = inner.messages.get(&id) else {
                break;
            };
            next = message.parent_message_id.clone();
            chain.push(message.clone());
        }

        chain.reverse();
        chain
    }
}
