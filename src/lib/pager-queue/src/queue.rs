use async_channel::{Receiver, Sender, TryRecvError};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue operation would block")]
    WouldBlock,
    #[error("queue peer disconnected")]
    Closed,
    #[error("completion for an id with no outstanding request")]
    UnknownCompletion,
}

#[derive(Clone, Copy, Debug)]
struct QueueEntry<T> {
    info: u32,
    item: T,
}

impl<T: Copy> QueueEntry<T> {
    fn new(info: u32, item: T) -> Self {
        Self { info, item }
    }
}

/// A single queue, holding two subqueues (sending and completion). Objects of
/// type S are sent across the sending queue, and completions of type C are
/// sent back. Both sides hold a clone of the same [Queue]; which operations a
/// side uses determines its role.
pub struct Queue<S, C> {
    sub_tx: Sender<QueueEntry<S>>,
    sub_rx: Receiver<QueueEntry<S>>,
    com_tx: Sender<QueueEntry<C>>,
    com_rx: Receiver<QueueEntry<C>>,
}

impl<S, C> Clone for Queue<S, C> {
    fn clone(&self) -> Self {
        Self {
            sub_tx: self.sub_tx.clone(),
            sub_rx: self.sub_rx.clone(),
            com_tx: self.com_tx.clone(),
            com_rx: self.com_rx.clone(),
        }
    }
}

impl<S: Copy, C: Copy> Queue<S, C> {
    /// Create a new queue with the given subqueue depths.
    pub fn new(sub_queue_len: usize, com_queue_len: usize) -> Self {
        let (sub_tx, sub_rx) = async_channel::bounded(sub_queue_len.max(1));
        let (com_tx, com_rx) = async_channel::bounded(com_queue_len.max(1));
        Self {
            sub_tx,
            sub_rx,
            com_tx,
            com_rx,
        }
    }

    /// Submit an item of type S across the sending subqueue, with a given id.
    pub async fn submit(&self, id: u32, item: S) -> Result<(), QueueError> {
        self.sub_tx
            .send(QueueEntry::new(id, item))
            .await
            .map_err(|_| QueueError::Closed)
    }

    /// Receive an item and request id from the sending subqueue.
    pub async fn receive(&self) -> Result<(u32, S), QueueError> {
        self.sub_rx
            .recv()
            .await
            .map(|qe| (qe.info, qe.item))
            .map_err(|_| QueueError::Closed)
    }

    /// Receive without blocking.
    pub fn try_receive(&self) -> Result<(u32, S), QueueError> {
        self.sub_rx
            .try_recv()
            .map(|qe| (qe.info, qe.item))
            .map_err(|e| match e {
                TryRecvError::Empty => QueueError::WouldBlock,
                TryRecvError::Closed => QueueError::Closed,
            })
    }

    /// Submit a completion item of type C across the completion subqueue.
    pub async fn complete(&self, id: u32, item: C) -> Result<(), QueueError> {
        self.com_tx
            .send(QueueEntry::new(id, item))
            .await
            .map_err(|_| QueueError::Closed)
    }

    /// Receive a completion item and id from the completion subqueue.
    pub async fn get_completion(&self) -> Result<(u32, C), QueueError> {
        self.com_rx
            .recv()
            .await
            .map(|qe| (qe.info, qe.item))
            .map_err(|_| QueueError::Closed)
    }

    /// Receive a completion without blocking.
    pub fn try_get_completion(&self) -> Result<(u32, C), QueueError> {
        self.com_rx
            .try_recv()
            .map(|qe| (qe.info, qe.item))
            .map_err(|e| match e {
                TryRecvError::Empty => QueueError::WouldBlock,
                TryRecvError::Closed => QueueError::Closed,
            })
    }
}
