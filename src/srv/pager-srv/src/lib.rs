//! An out-of-kernel pager service. The kernel forwards page faults and
//! object-lifecycle events over one queue pair, applications issue paging
//! advice (prefetch, sync, discard) over others, and the pager answers both
//! out of a cache of kernel-granted DRAM backed by canonical storage and a
//! swap area.

use std::sync::{Arc, Mutex, OnceLock};

use async_executor::Executor;
use pager_abi::{
    CompletionToKernel, CompletionToPager, CompletionToUser, PhysRange, RequestFromKernel,
    RequestFromPager, RequestFromUser, Result,
};
use pager_queue::{CallbackQueueReceiver, Queue, QueueSender};

pub mod cow;
pub mod data;
pub mod evict;
pub mod helpers;
pub mod kernel;
pub mod ledger;
pub mod physmem;
pub mod request_handle;
pub mod stats;
pub mod store;
pub mod user;

pub use cow::CopyChains;
pub use data::PagerData;
pub use evict::{ClockPolicy, EvictionPolicy};
pub use ledger::PageLedger;
pub use physmem::FrameArena;
pub use store::{MemStore, PagedObjectStore};

static EXECUTOR: OnceLock<Executor<'static>> = OnceLock::new();

pub fn executor() -> &'static Executor<'static> {
    EXECUTOR.get_or_init(Executor::new)
}

/// Drive a future to completion on the shared executor.
pub fn run_future<F: std::future::Future>(fut: F) -> F::Output {
    async_io::block_on(executor().run(fut))
}

fn tracing_init() {
    let _ = tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .without_time()
            .finish(),
    );
}

fn async_runtime_init(threads: u32) -> &'static Executor<'static> {
    let ex = executor();
    for _ in 0..threads {
        std::thread::spawn(|| {
            async_io::block_on(executor().run(futures::future::pending::<()>()))
        });
    }
    ex
}

#[derive(Clone, Copy, Debug)]
pub struct PagerConfig {
    pub nr_async_threads: u32,
    /// Pages evicted per pressure-relief round.
    pub evict_batch: usize,
    /// Seconds between throughput reports; zero disables them.
    pub stats_interval: u64,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            nr_async_threads: 2,
            evict_batch: 8,
            stats_interval: 10,
        }
    }
}

/// Everything the request handlers share. Lives for the life of the process.
pub struct PagerContext {
    pub data: PagerData,
    pub ledger: PageLedger,
    pub arena: FrameArena,
    pub cow: CopyChains,
    pub store: Arc<dyn PagedObjectStore>,
    pub policy: Mutex<Box<dyn EvictionPolicy>>,
    pub kernel: QueueSender<RequestFromPager, CompletionToPager>,
    pub config: PagerConfig,
}

impl PagerContext {
    pub fn new(
        config: PagerConfig,
        store: Arc<dyn PagedObjectStore>,
        kernel_queue: Queue<RequestFromPager, CompletionToPager>,
    ) -> &'static Self {
        Box::leak(Box::new(Self {
            data: PagerData::new(),
            ledger: PageLedger::new(),
            arena: FrameArena::new(),
            cow: CopyChains::new(),
            store,
            policy: Mutex::new(Box::new(ClockPolicy)),
            kernel: QueueSender::new(kernel_queue),
            config,
        }))
    }
}

async fn listen_kernel_queue(
    ctx: &'static PagerContext,
    queue: Queue<RequestFromKernel, CompletionToKernel>,
) {
    let receiver = Arc::new(CallbackQueueReceiver::new(queue));
    loop {
        let Ok((id, request)) = receiver.receive().await else {
            tracing::debug!("kernel queue closed");
            break;
        };
        let receiver = receiver.clone();
        executor()
            .spawn(async move {
                let completion = request_handle::handle_kernel_request(ctx, id, request).await;
                if let Err(e) = receiver.complete(id, completion).await {
                    tracing::warn!("failed to complete kernel request {}: {}", id, e);
                }
            })
            .detach();
    }
}

pub fn attach_kernel_queue(
    ctx: &'static PagerContext,
    queue: Queue<RequestFromKernel, CompletionToKernel>,
) {
    executor().spawn(listen_kernel_queue(ctx, queue)).detach();
}

pub fn attach_user_queue(
    ctx: &'static PagerContext,
    queue: Queue<RequestFromUser, CompletionToUser>,
) {
    executor().spawn(user::listen_user_queue(ctx, queue)).detach();
}

fn spawn_stats_reporter(ctx: &'static PagerContext) {
    let secs = ctx.config.stats_interval;
    if secs == 0 {
        return;
    }
    executor()
        .spawn(async move {
            loop {
                async_io::Timer::after(std::time::Duration::from_secs(secs)).await;
                let dt = ctx.data.stats.dt();
                let snap = ctx.data.stats.reset();
                if snap.had_activity() {
                    tracing::info!(
                        "fetched {:.1} KB/s, synced {:.1} KB/s, evicted {} pages, {} errors",
                        stats::pages_to_kbytes_per_sec(snap.pages_fetched, dt),
                        stats::pages_to_kbytes_per_sec(snap.pages_synced, dt),
                        snap.pages_evicted,
                        snap.errors,
                    );
                }
            }
        })
        .detach();
}

/// Bring the service up: start worker threads, begin serving the kernel
/// queue, and run the ready handshake to receive the initial DRAM grant.
pub fn pager_start(
    config: PagerConfig,
    store: Arc<dyn PagedObjectStore>,
    kernel_queue: Queue<RequestFromKernel, CompletionToKernel>,
    pager_queue: Queue<RequestFromPager, CompletionToPager>,
) -> Result<&'static PagerContext> {
    tracing_init();
    let ctx = PagerContext::new(config, store, pager_queue);
    async_runtime_init(ctx.config.nr_async_threads);
    attach_kernel_queue(ctx, kernel_queue);

    let grant: PhysRange = run_future(kernel::report_ready(ctx))?;
    ctx.arena.grant(&grant)?;
    ctx.ledger.grant(&grant)?;
    tracing::info!("pager ready with {} pages granted", grant.nr_pages);

    spawn_stats_reporter(ctx);
    Ok(ctx)
}
