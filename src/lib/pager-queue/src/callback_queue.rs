use std::{collections::HashSet, future::Future, sync::Mutex};

use crate::{Queue, QueueError};

/// The serving side of a [Queue]: receives requests and sends completions
/// back. Tracks which request ids are outstanding so that completing an
/// exchange twice is caught here rather than corrupting the peer's state.
pub struct CallbackQueueReceiver<S, C> {
    queue: Queue<S, C>,
    pending: Mutex<HashSet<u32>>,
}

impl<S: Copy, C: Copy> CallbackQueueReceiver<S, C> {
    pub fn new(queue: Queue<S, C>) -> Self {
        Self {
            queue,
            pending: Mutex::new(HashSet::new()),
        }
    }

    /// Receive a request without immediately returning a completion.
    pub async fn receive(&self) -> Result<(u32, S), QueueError> {
        let (id, item) = self.queue.receive().await?;
        self.pending.lock().unwrap().insert(id);
        Ok((id, item))
    }

    /// Send a completion back to the sender. Each received id may be
    /// completed exactly once.
    pub async fn complete(&self, id: u32, reply: C) -> Result<(), QueueError> {
        if !self.pending.lock().unwrap().remove(&id) {
            return Err(QueueError::UnknownCompletion);
        }
        self.queue.complete(id, reply).await
    }

    /// Handle a request in a closure that returns a completion.
    pub async fn handle<F, Fut>(&self, f: F) -> Result<(), QueueError>
    where
        F: FnOnce(u32, S) -> Fut,
        Fut: Future<Output = C>,
    {
        let (id, item) = self.receive().await?;
        let reply = f(id, item).await;
        self.complete(id, reply).await
    }
}
