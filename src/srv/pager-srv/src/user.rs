//! Dispatch for application-originated requests. Requests on one queue run
//! concurrently by default; barrier flags impose ordering at dispatch time.
//! A block-before request waits for everything in flight to drain, and a
//! block-after request fences later arrivals until it completes.

use std::sync::{Arc, Mutex};
use std::task::{Poll, Waker};

use pager_abi::{
    BarrierFlags, CompletionToUser, ObjectRange, PagerError, RequestFromUser, Result,
    UserCommand, UserCompletionData,
};
use pager_queue::{CallbackQueueReceiver, Queue};

use crate::helpers::PAGE;
use crate::{data, kernel, PagerContext};

struct FenceState {
    signaled: bool,
    wakers: Vec<Waker>,
}

struct Fence {
    state: Mutex<FenceState>,
}

impl Fence {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FenceState {
                signaled: false,
                wakers: vec![],
            }),
        })
    }

    fn signal(&self) {
        let mut state = self.state.lock().unwrap();
        state.signaled = true;
        for waker in state.wakers.drain(..) {
            waker.wake();
        }
    }
}

struct FenceWait {
    fence: Arc<Fence>,
}

impl std::future::Future for FenceWait {
    type Output = ();

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Self::Output> {
        let mut state = self.fence.state.lock().unwrap();
        if state.signaled {
            Poll::Ready(())
        } else {
            state.wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

#[derive(Default)]
struct GateInner {
    in_flight: usize,
    drain_wakers: Vec<Waker>,
    fence: Option<Arc<Fence>>,
}

/// Per-queue ordering state. Only the dispatcher loop consults it, so the
/// decisions happen in arrival order.
#[derive(Default)]
struct Gate {
    inner: Mutex<GateInner>,
}

struct DrainWait<'a> {
    gate: &'a Gate,
}

impl std::future::Future for DrainWait<'_> {
    type Output = ();

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Self::Output> {
        let mut inner = self.gate.inner.lock().unwrap();
        if inner.in_flight == 0 {
            Poll::Ready(())
        } else {
            inner.drain_wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

impl Gate {
    fn fence_wait(&self) -> Option<FenceWait> {
        let inner = self.inner.lock().unwrap();
        let fence = inner.fence.as_ref()?;
        if fence.state.lock().unwrap().signaled {
            return None;
        }
        Some(FenceWait {
            fence: fence.clone(),
        })
    }

    fn wait_drain(&self) -> DrainWait<'_> {
        DrainWait { gate: self }
    }

    fn enter(&self) {
        self.inner.lock().unwrap().in_flight += 1;
    }

    fn exit(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.in_flight -= 1;
        if inner.in_flight == 0 {
            for waker in inner.drain_wakers.drain(..) {
                waker.wake();
            }
        }
    }

    fn set_fence(&self) -> Arc<Fence> {
        let fence = Fence::new();
        self.inner.lock().unwrap().fence = Some(fence.clone());
        fence
    }
}

/// Serve one application queue until its peer goes away.
pub(crate) async fn listen_user_queue(
    ctx: &'static PagerContext,
    queue: Queue<RequestFromUser, CompletionToUser>,
) {
    let receiver = Arc::new(CallbackQueueReceiver::new(queue));
    let gate = Arc::new(Gate::default());
    loop {
        let Ok((id, request)) = receiver.receive().await else {
            tracing::debug!("user queue closed");
            break;
        };
        let barrier = request.barrier();
        if let Some(wait) = gate.fence_wait() {
            wait.await;
        }
        if barrier.contains(BarrierFlags::BLOCK_BEFORE) {
            gate.wait_drain().await;
        }
        gate.enter();
        let fence = barrier
            .contains(BarrierFlags::BLOCK_AFTER)
            .then(|| gate.set_fence());

        let receiver = receiver.clone();
        let gate = gate.clone();
        crate::executor()
            .spawn(async move {
                let completion = handle_user_request(ctx, id, request).await;
                if let Err(e) = receiver.complete(id, completion).await {
                    tracing::warn!("failed to complete user request {}: {}", id, e);
                }
                gate.exit();
                if let Some(fence) = fence {
                    fence.signal();
                }
            })
            .detach();
    }
}

fn okay() -> CompletionToUser {
    CompletionToUser::new(UserCompletionData::Okay)
}

fn err(e: PagerError) -> CompletionToUser {
    CompletionToUser::new(UserCompletionData::Error(e.into()))
}

/// Run one range-wise operation over a batch, reporting the first failure.
async fn for_each_range<'a, F, Fut>(ranges: &'a [ObjectRange], mut f: F) -> CompletionToUser
where
    F: FnMut(&'a ObjectRange) -> Fut,
    Fut: std::future::Future<Output = Result<()>> + 'a,
{
    for range in ranges {
        if let Err(e) = f(range).await {
            return err(e);
        }
    }
    okay()
}

pub async fn handle_user_request(
    ctx: &'static PagerContext,
    id: u32,
    request: RequestFromUser,
) -> CompletionToUser {
    tracing::debug!("handling user request {}: {:?}", id, request.cmd());
    match request.cmd() {
        UserCommand::ObjectInfoReq(obj_id) => match data::lookup_object(ctx, obj_id).await {
            Ok(info) => CompletionToUser::new(UserCompletionData::ObjectInfo(info)),
            Err(e) => err(e),
        },

        UserCommand::Prefetch(obj_id, ranges) => {
            if ranges.is_empty() {
                return err(PagerError::Protocol);
            }
            for_each_range(ranges.as_slice(), |range| async move {
                let runs = data::fetch(ctx, obj_id, *range).await?;
                // Offer the fetched pages to the kernel; a refusal is fine,
                // the cache is warm either way.
                let mut pages = range.pages();
                for run in runs {
                    let first = match pages.next() {
                        Some(page) => page,
                        None => break,
                    };
                    for _ in 1..run.nr_pages {
                        pages.next();
                    }
                    let covered = ObjectRange::new(first * PAGE, run.nr_pages * PAGE);
                    if let Err(e) = kernel::submit_prefetch(ctx, obj_id, covered, run).await {
                        tracing::debug!("kernel declined prefetch of {}: {}", obj_id, e);
                    }
                }
                Ok(())
            })
            .await
        }

        UserCommand::Sync(cmds) => {
            if cmds.is_empty() {
                return err(PagerError::Protocol);
            }
            for cmd in cmds.iter() {
                if let Err(e) = data::sync_range(ctx, cmd.obj_id, cmd.range).await {
                    return err(e);
                }
            }
            okay()
        }

        UserCommand::Discard(obj_id, ranges) => {
            if ranges.is_empty() {
                return err(PagerError::Protocol);
            }
            for_each_range(ranges.as_slice(), |range| data::discard(ctx, obj_id, *range)).await
        }

        UserCommand::ForgetWrites(obj_id, ranges) => {
            if ranges.is_empty() {
                return err(PagerError::Protocol);
            }
            for_each_range(ranges.as_slice(), |range| {
                data::forget_writes(ctx, obj_id, *range)
            })
            .await
        }

        UserCommand::ObjectCopy(cmd) => match data::apply_copy(ctx, &cmd).await {
            Ok(()) => okay(),
            Err(e) => err(e),
        },
    }
}
