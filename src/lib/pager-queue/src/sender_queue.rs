use std::{
    collections::BTreeMap,
    future::Future,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    task::{Poll, Waker},
};

use futures::future::{self, Either};

use crate::{Queue, QueueError};

struct WaitPoint<C> {
    item: Option<C>,
    waker: Option<Waker>,
}

struct WaitPointFuture<C> {
    state: Arc<Mutex<WaitPoint<C>>>,
}

impl<C: Copy> Future for WaitPointFuture<C> {
    type Output = C;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Self::Output> {
        let mut state = self.state.lock().unwrap();
        if let Some(item) = state.item.take() {
            Poll::Ready(item)
        } else {
            state.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

/// The submitting side of a [Queue]: allocates request ids, pairs completions
/// back up with their submissions, and wakes the right waiter. Any number of
/// tasks may call [QueueSender::submit_and_wait] concurrently.
pub struct QueueSender<S, C> {
    counter: AtomicU32,
    reuse: Mutex<Vec<u32>>,
    queue: Queue<S, C>,
    calls: Mutex<BTreeMap<u32, Arc<Mutex<WaitPoint<C>>>>>,
}

impl<S: Copy, C: Copy> QueueSender<S, C> {
    pub fn new(queue: Queue<S, C>) -> Self {
        Self {
            counter: AtomicU32::new(0),
            reuse: Mutex::new(vec![]),
            queue,
            calls: Mutex::new(BTreeMap::new()),
        }
    }

    fn next_id(&self) -> u32 {
        let mut reuse = self.reuse.lock().unwrap();
        reuse
            .pop()
            .unwrap_or_else(|| self.counter.fetch_add(1, Ordering::SeqCst))
    }

    fn release_id(&self, id: u32) {
        self.reuse.lock().unwrap().push(id)
    }

    /// Route a completion to its registered waiter. An id with no outstanding
    /// request means the peer completed something twice (or made an id up);
    /// only that exchange is failed.
    fn handle_completion(&self, id: u32, item: C) -> Result<(), QueueError> {
        let call = self.calls.lock().unwrap().remove(&id);
        let Some(call) = call else {
            tracing::warn!("dropping completion for unknown request id {}", id);
            return Err(QueueError::UnknownCompletion);
        };
        let mut call = call.lock().unwrap();
        call.item = Some(item);
        if let Some(waker) = call.waker.take() {
            waker.wake();
        }
        Ok(())
    }

    /// Submit an item and wait for its completion. Each pending exchange
    /// transitions from submitted to completed exactly once.
    pub async fn submit_and_wait(&self, item: S) -> Result<C, QueueError> {
        let id = self.next_id();
        let state = Arc::new(Mutex::new(WaitPoint::<C> {
            item: None,
            waker: None,
        }));
        self.calls.lock().unwrap().insert(id, state.clone());
        if let Err(e) = self.queue.submit(id, item).await {
            self.calls.lock().unwrap().remove(&id);
            self.release_id(id);
            return Err(e);
        }

        // Race our waiter against draining the completion subqueue; whichever
        // task loses the race still routes what it read to the right waiter.
        let mut waiter = Box::pin(WaitPointFuture {
            state: state.clone(),
        });
        let item = loop {
            let recv = Box::pin(self.queue.get_completion());
            match future::select(waiter, recv).await {
                Either::Left((item, _)) => break item,
                Either::Right((comp, w)) => {
                    waiter = w;
                    let (cid, citem) = comp?;
                    let _ = self.handle_completion(cid, citem);
                }
            }
        };
        self.release_id(id);
        Ok(item)
    }
}
