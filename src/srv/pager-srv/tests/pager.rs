//! End-to-end exercises of the service behind real queues, with this test
//! binary standing in for the kernel: it grants DRAM, answers eviction
//! notices from the flag bitmap, and plays the application writing through
//! its (simulated) mappings.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock,
};
use std::time::Duration;

use pager_abi::{
    BackingType, BarrierFlags, CompletionToPager, CopyCmd, ErrorCode, ItemList, KernelCommand,
    KernelCompletionData, Lifetime, ObjID, ObjectInfo, ObjectRange, PageFlags,
    PagerCompletionData, PagerRequest, PhysRange, RequestFromKernel, RequestFromPager,
    RequestFromUser, SyncCmd, UserCommand, UserCompletionData, PAGE_SIZE,
};
use pager_queue::{CallbackQueueReceiver, Queue, QueueSender};
use pager_srv::{
    attach_user_queue, data, evict, pager_start, run_future, store::PagedObjectStore, MemStore,
    PagerConfig, PagerContext,
};

const PAGE: u64 = PAGE_SIZE;

struct Harness {
    ctx: &'static PagerContext,
    store: Arc<MemStore>,
    kernel: QueueSender<RequestFromKernel, pager_abi::CompletionToKernel>,
    user: QueueSender<RequestFromUser, pager_abi::CompletionToUser>,
    user_queue: Queue<RequestFromUser, pager_abi::CompletionToUser>,
    /// When set, the fake kernel dirties each page just before reporting an
    /// eviction, simulating a write that raced the unmap.
    dirty_on_evict: Arc<AtomicBool>,
    /// When set, the fake kernel fails every eviction notice.
    fail_evict: Arc<AtomicBool>,
}

fn find_phys(ctx: &PagerContext, id: ObjID, obj_page: u64) -> Option<u64> {
    (0..1024).find(|&p| ctx.ledger.owner(p) == Some((id, obj_page)))
}

fn start(grant_pages: u64) -> Harness {
    let kernel_queue = Queue::new(32, 32);
    let pager_queue: Queue<RequestFromPager, CompletionToPager> = Queue::new(32, 32);
    let user_queue = Queue::new(32, 32);
    let store = Arc::new(MemStore::new());
    let ctx_cell: Arc<OnceLock<&'static PagerContext>> = Arc::new(OnceLock::new());
    let dirty_on_evict = Arc::new(AtomicBool::new(false));
    let fail_evict = Arc::new(AtomicBool::new(false));

    {
        let queue = pager_queue.clone();
        let cell = ctx_cell.clone();
        let dirty = dirty_on_evict.clone();
        let fail = fail_evict.clone();
        std::thread::spawn(move || {
            async_io::block_on(async move {
                let recv = CallbackQueueReceiver::new(queue);
                loop {
                    let Ok((id, req)) = recv.receive().await else {
                        break;
                    };
                    let data = match req.cmd() {
                        PagerRequest::Ready => {
                            PagerCompletionData::DramPages(PhysRange::new(0, grant_pages))
                        }
                        PagerRequest::Evict(_) if fail.load(Ordering::Relaxed) => {
                            PagerCompletionData::Error(ErrorCode::StorageIo)
                        }
                        PagerRequest::Evict(info) => match cell.get() {
                            None => PagerCompletionData::Error(ErrorCode::Protocol),
                            Some(ctx) => {
                                let mut flags_list = ItemList::new();
                                let mut unmapped = 0;
                                for range in info.ranges.as_slice() {
                                    let mut flags = PageFlags::empty();
                                    for obj_page in range.pages() {
                                        let Some(phys) = find_phys(ctx, info.obj_id, obj_page)
                                        else {
                                            continue;
                                        };
                                        if dirty.load(Ordering::Relaxed) {
                                            let mut buf = vec![0u8; PAGE as usize];
                                            ctx.arena.read_page(phys, &mut buf).unwrap();
                                            buf[0] = 0xee;
                                            ctx.arena.write_page(phys, &buf).unwrap();
                                            ctx.arena
                                                .kernel_mark(phys, PageFlags::DIRTY)
                                                .unwrap();
                                        }
                                        flags |= ctx
                                            .arena
                                            .kernel_flags(phys)
                                            .unwrap_or_default();
                                        ctx.arena.kernel_reset(phys).unwrap();
                                        unmapped += 1;
                                    }
                                    flags -= PageFlags::MAPPED;
                                    let _ = flags_list.push(flags);
                                }
                                PagerCompletionData::EvictSuccess(pager_abi::EvictStats {
                                    nr_unmapped: unmapped,
                                    flags: flags_list,
                                })
                            }
                        },
                        _ => PagerCompletionData::Okay,
                    };
                    if recv.complete(id, CompletionToPager::new(data)).await.is_err() {
                        break;
                    }
                }
            })
        });
    }

    let config = PagerConfig {
        nr_async_threads: 2,
        evict_batch: 2,
        stats_interval: 0,
    };
    let ctx = pager_start(
        config,
        store.clone(),
        kernel_queue.clone(),
        pager_queue,
    )
    .unwrap();
    let _ = ctx_cell.set(ctx);
    attach_user_queue(ctx, user_queue.clone());

    Harness {
        ctx,
        store,
        kernel: QueueSender::new(kernel_queue),
        user: QueueSender::new(user_queue.clone()),
        user_queue,
        dirty_on_evict,
        fail_evict,
    }
}

impl Harness {
    fn kernel_req(&self, cmd: KernelCommand) -> KernelCompletionData {
        run_future(self.kernel.submit_and_wait(RequestFromKernel::new(cmd)))
            .unwrap()
            .data()
    }

    fn user_req(&self, cmd: UserCommand) -> UserCompletionData {
        run_future(self.user.submit_and_wait(RequestFromUser::new(cmd)))
            .unwrap()
            .data()
    }

    fn create(&self, id: u128, lifetime: Lifetime) {
        let info = ObjectInfo::new(ObjID::new(id), lifetime, BackingType::Normal, 0);
        match self.kernel_req(KernelCommand::ObjectCreate(info)) {
            KernelCompletionData::ObjectInfo(got) => assert_eq!(got, info),
            other => panic!("create failed: {:?}", other),
        }
    }

    fn seed(&self, id: u128, offset: u64, bytes: &[u8]) {
        run_future(self.store.write_object(ObjID::new(id), offset, bytes)).unwrap();
    }

    fn canonical(&self, id: u128, offset: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.store.peek(ObjID::new(id), offset, &mut buf).unwrap();
        buf
    }

    fn fault(&self, id: u128, range: ObjectRange) -> Vec<PhysRange> {
        let ranges = ItemList::from_slice(&[range]).unwrap();
        match self.kernel_req(KernelCommand::PageDataReq(ObjID::new(id), ranges)) {
            KernelCompletionData::PageInfo(runs) => runs.as_slice().to_vec(),
            other => panic!("fault failed: {:?}", other),
        }
    }

    fn phys_of(&self, id: u128, obj_page: u64) -> u64 {
        find_phys(self.ctx, ObjID::new(id), obj_page).expect("page not resident")
    }

    fn read_phys(&self, phys: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.ctx.arena.read_page(phys, &mut buf).unwrap();
        buf
    }

    /// Play the application writing through its mapping: mutate the page in
    /// the arena and let the kernel publish the dirty bit.
    fn app_write(&self, id: u128, obj_page: u64, bytes: &[u8]) {
        let phys = self.phys_of(id, obj_page);
        let mut buf = vec![0u8; PAGE as usize];
        self.ctx.arena.read_page(phys, &mut buf).unwrap();
        buf[..bytes.len()].copy_from_slice(bytes);
        self.ctx.arena.write_page(phys, &buf).unwrap();
        self.ctx.arena.kernel_mark(phys, PageFlags::DIRTY).unwrap();
    }

    fn sync(&self, id: u128, range: ObjectRange) -> UserCompletionData {
        let cmds = ItemList::from_slice(&[SyncCmd::new(ObjID::new(id), range)]).unwrap();
        self.user_req(UserCommand::Sync(cmds))
    }

    fn ranges(&self, range: ObjectRange) -> ItemList<ObjectRange, { pager_abi::NR_RANGES }> {
        ItemList::from_slice(&[range]).unwrap()
    }
}

fn page0() -> ObjectRange {
    ObjectRange::new(0, PAGE)
}

#[test]
fn object_info_round_trip_and_not_found() {
    let h = start(16);
    h.create(1, Lifetime::Persistent);

    match h.kernel_req(KernelCommand::ObjectInfoReq(ObjID::new(1))) {
        KernelCompletionData::ObjectInfo(info) => {
            assert_eq!(info.obj_id, ObjID::new(1));
            assert_eq!(info.lifetime, Lifetime::Persistent);
        }
        other => panic!("unexpected completion: {:?}", other),
    }
    assert_eq!(
        h.kernel_req(KernelCommand::ObjectInfoReq(ObjID::new(99))),
        KernelCompletionData::Error(ErrorCode::NotFound)
    );
    // A failed exchange leaves the service serving.
    assert!(matches!(
        h.user_req(UserCommand::ObjectInfoReq(ObjID::new(1))),
        UserCompletionData::ObjectInfo(_)
    ));
}

#[test]
fn fault_returns_canonical_bytes() {
    let h = start(16);
    h.create(2, Lifetime::Persistent);
    h.seed(2, PAGE + 16, b"stored bytes");

    let runs = h.fault(2, ObjectRange::new(PAGE, PAGE));
    assert_eq!(runs.len(), 1);
    // Page-info runs are bare data pages; they claim no metadata region.
    assert_eq!(runs[0].meta_nr_pages, 0);
    let phys = runs[0].start / PAGE;
    let got = h.read_phys(phys, 64);
    assert_eq!(&got[16..28], b"stored bytes");
}

#[test]
fn fault_partial_when_one_range_fails() {
    let h = start(16);
    h.create(3, Lifetime::Persistent);
    h.create(4, Lifetime::Persistent);
    // A two-entry cycle between objects 3 and 4.
    h.user_req(UserCommand::ObjectCopy(CopyCmd {
        src: ObjID::new(3),
        dst: ObjID::new(4),
        len: PAGE,
        src_start: 0,
        dst_start: 0,
    }));
    h.user_req(UserCommand::ObjectCopy(CopyCmd {
        src: ObjID::new(4),
        dst: ObjID::new(3),
        len: PAGE,
        src_start: 0,
        dst_start: 0,
    }));

    // Alone, the cyclic range is an error.
    let ranges = ItemList::from_slice(&[page0()]).unwrap();
    assert_eq!(
        h.kernel_req(KernelCommand::PageDataReq(ObjID::new(3), ranges)),
        KernelCompletionData::Error(ErrorCode::CopyConflict)
    );

    // Preceded by a clean range, the same request partially succeeds.
    let ranges = ItemList::from_slice(&[ObjectRange::new(PAGE, PAGE), page0()]).unwrap();
    match h.kernel_req(KernelCommand::PageDataReq(ObjID::new(3), ranges)) {
        KernelCompletionData::PageInfo(runs) => {
            assert_eq!(runs.iter().map(|r| r.nr_pages).sum::<u64>(), 1);
        }
        other => panic!("unexpected completion: {:?}", other),
    }
}

// The full life of one written page: preserved across eviction via swap,
// canonical storage untouched until an explicit sync.
#[test]
fn write_evict_fault_then_sync() {
    let h = start(8);
    h.create(7, Lifetime::Persistent);
    h.seed(7, 0, b"prior contents");

    h.fault(7, page0());
    h.app_write(7, 0, b"new bytes written");
    let phys = h.phys_of(7, 0);

    let po = h.ctx.data.per_object(ObjID::new(7));
    let evicted = run_future(evict::evict_pages(h.ctx, &po, &[(0, phys)], false)).unwrap();
    assert_eq!(evicted, 1);
    // No in-place eviction: canonical bytes still the prior contents.
    assert_eq!(h.canonical(7, 0, 14), b"prior contents");

    let runs = h.fault(7, page0());
    let phys = runs[0].start / PAGE;
    assert_eq!(h.read_phys(phys, 17), b"new bytes written");
    assert_eq!(h.canonical(7, 0, 14), b"prior contents");

    assert_eq!(h.sync(7, page0()), UserCompletionData::Okay);
    assert_eq!(h.canonical(7, 0, 17), b"new bytes written");
}

#[test]
fn discard_drops_writes_and_faults_fresh() {
    let h = start(8);
    h.create(5, Lifetime::Persistent);
    h.seed(5, 0, b"canonical");

    h.fault(5, page0());
    h.app_write(5, 0, b"doomed write");
    assert_eq!(
        h.user_req(UserCommand::Discard(ObjID::new(5), h.ranges(page0()))),
        UserCompletionData::Okay
    );
    assert_eq!(h.canonical(5, 0, 9), b"canonical");

    let runs = h.fault(5, page0());
    let got = h.read_phys(runs[0].start / PAGE, 32);
    assert_eq!(got, vec![0u8; 32]);
}

#[test]
fn forget_writes_skips_writeback() {
    let h = start(8);
    h.create(6, Lifetime::Persistent);
    h.seed(6, 0, b"untouched");

    h.fault(6, page0());
    h.app_write(6, 0, b"disclaimed");
    assert_eq!(
        h.user_req(UserCommand::ForgetWrites(ObjID::new(6), h.ranges(page0()))),
        UserCompletionData::Okay
    );
    assert_eq!(h.sync(6, page0()), UserCompletionData::Okay);
    assert_eq!(h.canonical(6, 0, 9), b"untouched");
}

#[test]
fn failed_sync_leaves_data_dirty_and_resident() {
    let h = start(8);
    h.create(8, Lifetime::Persistent);

    h.fault(8, page0());
    h.app_write(8, 0, b"must survive");
    h.store.fail_object_writes(data::MAX_WRITE_TRIES);
    assert_eq!(
        h.sync(8, page0()),
        UserCompletionData::Error(ErrorCode::StorageIo)
    );
    assert_eq!(h.canonical(8, 0, 12), vec![0u8; 12]);

    // The data is still there; a later sync lands it.
    assert_eq!(h.sync(8, page0()), UserCompletionData::Okay);
    assert_eq!(h.canonical(8, 0, 12), b"must survive");
}

#[test]
fn memory_pressure_evicts_transparently() {
    let h = start(2);
    h.create(10, Lifetime::Persistent);
    for page in 0u64..4 {
        h.seed(10, page * PAGE, format!("page {}", page).as_bytes());
    }

    // Four pages through two frames; eviction must make room silently.
    for page in 0u64..4 {
        let runs = h.fault(10, ObjectRange::new(page * PAGE, PAGE));
        let got = h.read_phys(runs[0].start / PAGE, 6);
        assert_eq!(&got, format!("page {}", page).as_bytes());
    }
    assert!(h.ctx.ledger.avail_pages() <= 2);
}

#[test]
fn eviction_completion_flags_beat_snapshot() {
    let h = start(8);
    h.create(11, Lifetime::Persistent);
    h.fault(11, page0());
    let phys = h.phys_of(11, 0);

    // The page looks clean, but a write races the unmap; the completion's
    // dirty flag must force a swap copy anyway.
    h.dirty_on_evict.store(true, Ordering::Relaxed);
    let po = h.ctx.data.per_object(ObjID::new(11));
    let evicted = run_future(evict::evict_pages(h.ctx, &po, &[(0, phys)], false)).unwrap();
    h.dirty_on_evict.store(false, Ordering::Relaxed);
    assert_eq!(evicted, 1);

    let runs = h.fault(11, page0());
    let got = h.read_phys(runs[0].start / PAGE, 1);
    assert_eq!(got[0], 0xee);
    assert_eq!(h.canonical(11, 0, 1), vec![0u8]);
}

#[test]
fn volatile_copy_materializes_into_canonical_on_sync() {
    let h = start(8);
    h.create(20, Lifetime::Volatile);
    h.create(21, Lifetime::Persistent);

    h.fault(20, page0());
    h.app_write(20, 0, b"volatile source");
    assert_eq!(
        h.user_req(UserCommand::ObjectCopy(CopyCmd {
            src: ObjID::new(20),
            dst: ObjID::new(21),
            len: PAGE,
            src_start: 0,
            dst_start: 0,
        })),
        UserCompletionData::Okay
    );
    assert_eq!(h.sync(21, page0()), UserCompletionData::Okay);
    assert_eq!(h.canonical(21, 0, 15), b"volatile source");
}

#[test]
fn same_object_copy_syncs_destination() {
    let h = start(8);
    h.create(9, Lifetime::Persistent);
    h.seed(9, 0, b"source bytes");

    // Copy page 0 over page 1 of the same object.
    assert_eq!(
        h.user_req(UserCommand::ObjectCopy(CopyCmd {
            src: ObjID::new(9),
            dst: ObjID::new(9),
            len: PAGE,
            src_start: 0,
            dst_start: PAGE,
        })),
        UserCompletionData::Okay
    );
    assert_eq!(
        h.sync(9, ObjectRange::new(PAGE, PAGE)),
        UserCompletionData::Okay
    );
    assert_eq!(h.canonical(9, PAGE, 12), b"source bytes");
    assert_eq!(h.canonical(9, 0, 12), b"source bytes");
}

#[test]
fn unalignable_range_is_rejected() {
    let h = start(8);
    h.create(90, Lifetime::Persistent);

    // The end sits inside the last page of the address space, so it cannot
    // be widened to a page boundary; the request must fail, not panic.
    let range = ObjectRange::new(u64::MAX - 10, 10);
    assert_eq!(
        h.user_req(UserCommand::Discard(ObjID::new(90), h.ranges(range))),
        UserCompletionData::Error(ErrorCode::InvalidRange)
    );
    // The handler task survived.
    assert!(matches!(
        h.user_req(UserCommand::ObjectInfoReq(ObjID::new(90))),
        UserCompletionData::ObjectInfo(_)
    ));
}

#[test]
fn failed_eviction_keeps_pages_and_frees_swap() {
    let h = start(8);
    h.create(12, Lifetime::Persistent);
    h.fault(12, page0());
    h.app_write(12, 0, b"kept");
    let phys = h.phys_of(12, 0);

    h.fail_evict.store(true, Ordering::Relaxed);
    let po = h.ctx.data.per_object(ObjID::new(12));
    assert!(run_future(evict::evict_pages(h.ctx, &po, &[(0, phys)], false)).is_err());
    h.fail_evict.store(false, Ordering::Relaxed);

    // Still resident with its bytes, and no swap copy left behind.
    assert_eq!(h.phys_of(12, 0), phys);
    assert_eq!(h.read_phys(phys, 4), b"kept");
    assert_eq!(h.store.swap_len(), 0);

    // A later eviction of the same page goes through.
    let evicted = run_future(evict::evict_pages(h.ctx, &po, &[(0, phys)], false)).unwrap();
    assert_eq!(evicted, 1);
}

#[test]
fn volatile_sync_materializes_without_write() {
    let h = start(8);
    h.create(80, Lifetime::Persistent);
    h.create(81, Lifetime::Volatile);
    h.seed(80, 0, b"seed data");

    assert_eq!(
        h.user_req(UserCommand::ObjectCopy(CopyCmd {
            src: ObjID::new(80),
            dst: ObjID::new(81),
            len: PAGE,
            src_start: 0,
            dst_start: 0,
        })),
        UserCompletionData::Okay
    );
    // Sync of a volatile object materializes the chain and writes nothing.
    assert_eq!(h.sync(81, page0()), UserCompletionData::Okay);
    let phys = h.phys_of(81, 0);
    assert_eq!(h.read_phys(phys, 9), b"seed data");
}

#[test]
fn volatile_to_volatile_copy_is_a_protocol_error() {
    let h = start(8);
    h.create(30, Lifetime::Volatile);
    h.create(31, Lifetime::Volatile);

    let cmd = CopyCmd {
        src: ObjID::new(30),
        dst: ObjID::new(31),
        len: PAGE,
        src_start: 0,
        dst_start: 0,
    };
    assert_eq!(
        h.user_req(UserCommand::ObjectCopy(cmd)),
        UserCompletionData::Error(ErrorCode::Protocol)
    );
    assert_eq!(
        h.kernel_req(KernelCommand::ObjectCopy(cmd)),
        KernelCompletionData::Error(ErrorCode::Protocol)
    );
    // Not fatal: the service keeps answering.
    assert!(matches!(
        h.user_req(UserCommand::ObjectInfoReq(ObjID::new(30))),
        UserCompletionData::ObjectInfo(_)
    ));
}

#[test]
fn zero_fill_copy_shadows_resident_bytes() {
    let h = start(8);
    h.create(40, Lifetime::Persistent);
    h.seed(40, 0, b"old data");
    h.fault(40, page0());

    assert_eq!(
        h.user_req(UserCommand::ObjectCopy(CopyCmd {
            src: ObjID::new(0),
            dst: ObjID::new(40),
            len: PAGE,
            src_start: 0,
            dst_start: 0,
        })),
        UserCompletionData::Okay
    );
    let runs = h.fault(40, page0());
    assert_eq!(h.read_phys(runs[0].start / PAGE, 8), vec![0u8; 8]);
}

#[test]
fn block_after_fences_later_requests() {
    let h = start(8);
    h.create(50, Lifetime::Persistent);
    h.fault(50, page0());
    h.app_write(50, 0, b"slow sync");
    h.store.set_write_delay(Some(Duration::from_millis(100)));

    let cmds = ItemList::from_slice(&[SyncCmd::new(ObjID::new(50), page0())]).unwrap();
    let queue = h.user_queue.clone();
    run_future(async move {
        queue
            .submit(
                1001,
                RequestFromUser::with_barrier(UserCommand::Sync(cmds), BarrierFlags::BLOCK_AFTER),
            )
            .await
            .unwrap();
        queue
            .submit(
                1002,
                RequestFromUser::new(UserCommand::ObjectInfoReq(ObjID::new(50))),
            )
            .await
            .unwrap();
        let (first, _) = queue.get_completion().await.unwrap();
        assert_eq!(first, 1001);
        let (second, _) = queue.get_completion().await.unwrap();
        assert_eq!(second, 1002);
    });
}

#[test]
fn block_before_waits_for_in_flight_requests() {
    let h = start(8);
    h.create(51, Lifetime::Persistent);
    h.fault(51, page0());
    h.app_write(51, 0, b"slow sync");
    h.store.set_write_delay(Some(Duration::from_millis(100)));

    let cmds = ItemList::from_slice(&[SyncCmd::new(ObjID::new(51), page0())]).unwrap();
    let queue = h.user_queue.clone();
    run_future(async move {
        queue
            .submit(2001, RequestFromUser::new(UserCommand::Sync(cmds)))
            .await
            .unwrap();
        queue
            .submit(
                2002,
                RequestFromUser::with_barrier(
                    UserCommand::ObjectInfoReq(ObjID::new(51)),
                    BarrierFlags::BLOCK_BEFORE,
                ),
            )
            .await
            .unwrap();
        let (first, _) = queue.get_completion().await.unwrap();
        assert_eq!(first, 2001);
        let (second, _) = queue.get_completion().await.unwrap();
        assert_eq!(second, 2002);
    });
}

#[test]
fn dram_grants_extend_the_arena() {
    let h = start(4);
    let before = h.ctx.ledger.avail_pages();

    let grant = PhysRange::new(1024 * PAGE, 8);
    let ranges = ItemList::from_slice(&[grant]).unwrap();
    assert_eq!(
        h.kernel_req(KernelCommand::DramPages(ranges)),
        KernelCompletionData::Okay
    );
    assert_eq!(h.ctx.ledger.avail_pages(), before + 8);

    let bad = PhysRange::new(2048 * PAGE + 1, 2);
    let ranges = ItemList::from_slice(&[bad]).unwrap();
    assert_eq!(
        h.kernel_req(KernelCommand::DramPages(ranges)),
        KernelCompletionData::Error(ErrorCode::InvalidRange)
    );
}

#[test]
fn object_delete_releases_everything() {
    let h = start(8);
    h.create(60, Lifetime::Persistent);
    h.fault(60, page0());
    let avail = h.ctx.ledger.avail_pages();

    assert_eq!(
        h.kernel_req(KernelCommand::ObjectDel(ObjID::new(60))),
        KernelCompletionData::Okay
    );
    assert_eq!(
        h.kernel_req(KernelCommand::ObjectInfoReq(ObjID::new(60))),
        KernelCompletionData::Error(ErrorCode::NotFound)
    );
    assert_eq!(h.ctx.ledger.avail_pages(), avail + 1);
}

#[test]
fn user_prefetch_warms_the_cache() {
    let h = start(8);
    h.create(70, Lifetime::Persistent);
    h.seed(70, 0, b"warm");

    assert_eq!(
        h.user_req(UserCommand::Prefetch(ObjID::new(70), h.ranges(page0()))),
        UserCompletionData::Okay
    );
    let phys = h.phys_of(70, 0);
    assert_eq!(h.read_phys(phys, 4), b"warm");
}
