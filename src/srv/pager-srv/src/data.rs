//! Per-object page cache state and the operations that move pages between
//! DRAM, swap, and canonical storage. Each object's state sits behind its own
//! async mutex; a condvar serializes syncs per object. No path here ever
//! writes canonical storage except a sync.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_condvar_fair::Condvar;
use itertools::Itertools;
use pager_abi::{
    ObjID, ObjectInfo, ObjectRange, PageFlags, PagerError, PhysRange, Result,
};

use crate::cow::SegmentSource;
use crate::helpers::{self, PAGE};
use crate::stats::RecentStats;
use crate::store::SwapSlot;
use crate::PagerContext;

/// Write-back attempts before a storage error is reported to the caller.
pub const MAX_WRITE_TRIES: usize = 3;

/// Where one object page currently lives. `forgotten` masks dirty state the
/// caller has disclaimed with a forget-writes request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageState {
    Resident { phys: u64, forgotten: bool },
    Evicted { swap: Option<SwapSlot> },
}

pub struct PerObjectInner {
    pub info: Option<ObjectInfo>,
    pub pages: BTreeMap<u64, PageState>,
    pub syncing: bool,
    pub version: u64,
}

#[derive(Clone)]
pub struct PerObject {
    id: ObjID,
    inner: Arc<(Condvar, async_lock::Mutex<PerObjectInner>)>,
}

impl PerObject {
    fn new(id: ObjID) -> Self {
        Self {
            id,
            inner: Arc::new((
                Condvar::new(),
                async_lock::Mutex::new(PerObjectInner {
                    info: None,
                    pages: BTreeMap::new(),
                    syncing: false,
                    version: 0,
                }),
            )),
        }
    }

    pub fn id(&self) -> ObjID {
        self.id
    }

    pub async fn lock(&self) -> async_lock::MutexGuard<'_, PerObjectInner> {
        self.inner.1.lock().await
    }

    pub fn try_lock(&self) -> Option<async_lock::MutexGuard<'_, PerObjectInner>> {
        self.inner.1.try_lock()
    }

    pub fn condvar(&self) -> &Condvar {
        &self.inner.0
    }
}

#[derive(Default)]
struct PagerDataInner {
    per_obj: HashMap<ObjID, PerObject>,
}

pub struct PagerData {
    inner: Mutex<PagerDataInner>,
    pub stats: RecentStats,
}

impl Default for PagerData {
    fn default() -> Self {
        Self::new()
    }
}

impl PagerData {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PagerDataInner::default()),
            stats: RecentStats::default(),
        }
    }

    pub fn per_object(&self, id: ObjID) -> PerObject {
        let mut inner = self.inner.lock().unwrap();
        inner
            .per_obj
            .entry(id)
            .or_insert_with(|| PerObject::new(id))
            .clone()
    }

    /// Snapshot of every tracked object, for victim scans.
    pub fn objects(&self) -> Vec<PerObject> {
        self.inner
            .lock()
            .unwrap()
            .per_obj
            .values()
            .cloned()
            .collect()
    }

    pub fn remove_object(&self, id: ObjID) {
        self.inner.lock().unwrap().per_obj.remove(&id);
    }
}

pub async fn lookup_object(ctx: &PagerContext, id: ObjID) -> Result<ObjectInfo> {
    let po = ctx.data.per_object(id);
    let mut guard = po.lock().await;
    if let Some(info) = guard.info {
        return Ok(info);
    }
    let info = ctx.store.object_info(id).await?;
    guard.info = Some(info);
    Ok(info)
}

pub async fn register_object(ctx: &PagerContext, info: ObjectInfo) -> Result<()> {
    ctx.store.create_object(&info).await?;
    let po = ctx.data.per_object(info.obj_id);
    po.lock().await.info = Some(info);
    tracing::debug!("registered object {} ({:?})", info.obj_id, info.lifetime);
    Ok(())
}

/// Tear down all state for an object: resident pages, swap copies, chain
/// entries, and the store's record of it.
pub async fn drop_object(ctx: &PagerContext, id: ObjID) -> Result<()> {
    let po = ctx.data.per_object(id);
    {
        let mut guard = po.lock().await;
        for (_, state) in std::mem::take(&mut guard.pages) {
            match state {
                PageState::Resident { phys, .. } => ctx.ledger.free_page(phys),
                PageState::Evicted { swap: Some(slot) } => ctx.store.free_swap(slot),
                PageState::Evicted { swap: None } => {}
            }
        }
        guard.info = None;
    }
    ctx.cow.clear_object(id);
    ctx.data.remove_object(id);
    ctx.store.delete_object(id).await
}

/// Write canonical bytes with bounded retries.
pub(crate) async fn write_back(
    ctx: &PagerContext,
    id: ObjID,
    offset: u64,
    buf: &[u8],
) -> Result<()> {
    let mut tries = 0;
    loop {
        match ctx.store.write_object(id, offset, buf).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tries += 1;
                tracing::warn!("write-back of {}+{:x} failed (try {}): {}", id, offset, tries, e);
                if tries >= MAX_WRITE_TRIES {
                    ctx.data.stats.error();
                    return Err(e);
                }
            }
        }
    }
}

/// Stash one page in swap with bounded retries.
pub(crate) async fn write_swap(ctx: &PagerContext, buf: &[u8]) -> Result<SwapSlot> {
    let mut tries = 0;
    loop {
        match ctx.store.write_swap(buf).await {
            Ok(slot) => return Ok(slot),
            Err(e) => {
                tries += 1;
                tracing::warn!("swap write failed (try {}): {}", tries, e);
                if tries >= MAX_WRITE_TRIES {
                    ctx.data.stats.error();
                    return Err(e);
                }
            }
        }
    }
}

/// Allocate one physical page, transparently evicting under pressure. Only
/// reports out-of-memory once eviction can free nothing.
async fn grab_page(ctx: &PagerContext) -> Result<u64> {
    loop {
        if let Some(page) = ctx.ledger.try_alloc() {
            return Ok(page);
        }
        match crate::evict::relieve_pressure(ctx).await {
            // Another worker's eviction is in flight; wait for its pages.
            Ok(0) => return Ok(ctx.ledger.alloc().await),
            Ok(_) => continue,
            Err(e) => return Err(e),
        }
    }
}

enum Prepared {
    FromSwap(SwapSlot),
    Fresh { dirty: bool },
}

/// Assemble the content of one absent page into `buf`.
async fn prepare_page(
    ctx: &PagerContext,
    id: ObjID,
    info: &ObjectInfo,
    state: Option<PageState>,
    page: u64,
    buf: &mut [u8],
) -> Result<Prepared> {
    if let Some(PageState::Evicted { swap: Some(slot) }) = state {
        ctx.store.read_swap(slot, buf).await?;
        return Ok(Prepared::FromSwap(slot));
    }

    let range = helpers::page_to_range(page);
    let segments = ctx.cow.resolve(id, range)?;
    let mut dirty = false;
    for seg in segments {
        let dst = &mut buf[(seg.offset - range.start) as usize..][..seg.len as usize];
        match seg.source {
            SegmentSource::Zero => {
                dst.fill(0);
                dirty = true;
            }
            // The identity segment: this object's own bytes at their own
            // offset, with no chain entry behind them.
            SegmentSource::Source { id: sid, start } if sid == id && start == seg.offset => {
                if info.lifetime == pager_abi::Lifetime::Persistent {
                    ctx.store.read_object(id, start, dst).await?;
                } else {
                    // First touch of a volatile page.
                    dst.fill(0);
                }
            }
            // A chain source, which may be this same object at a shifted
            // offset; either way the bytes must land dirty so the chain
            // entry is consumed.
            SegmentSource::Source { id: sid, start } => {
                read_source(ctx, sid, start, dst).await?;
                dirty = true;
            }
        }
    }
    Ok(Prepared::Fresh { dirty })
}

/// Read the current bytes of a source object, through its cache: resident
/// pages win over swap copies, which win over canonical storage.
async fn read_source(ctx: &PagerContext, sid: ObjID, start: u64, out: &mut [u8]) -> Result<()> {
    let info = lookup_object(ctx, sid).await?;
    let po = ctx.data.per_object(sid);
    let guard = po.lock().await;
    let mut page_buf = vec![0u8; PAGE as usize];
    let mut pos = 0usize;
    while pos < out.len() {
        let off = start + pos as u64;
        let page = off / PAGE;
        let in_page = (off % PAGE) as usize;
        let take = (PAGE as usize - in_page).min(out.len() - pos);
        match guard.pages.get(&page).copied() {
            Some(PageState::Resident { phys, .. }) => {
                ctx.arena.read_page(phys, &mut page_buf)?;
                out[pos..pos + take].copy_from_slice(&page_buf[in_page..in_page + take]);
            }
            Some(PageState::Evicted { swap: Some(slot) }) => {
                ctx.store.read_swap(slot, &mut page_buf).await?;
                out[pos..pos + take].copy_from_slice(&page_buf[in_page..in_page + take]);
            }
            _ => {
                if info.lifetime == pager_abi::Lifetime::Persistent {
                    ctx.store.read_object(sid, off, &mut out[pos..pos + take]).await?;
                } else {
                    out[pos..pos + take].fill(0);
                }
            }
        }
        pos += take;
    }
    Ok(())
}

/// Bring the pages of `range` into DRAM and return their physical runs, in
/// request order. May return fewer pages than asked under resource pressure,
/// as long as at least one was produced.
pub async fn fetch(ctx: &PagerContext, id: ObjID, range: ObjectRange) -> Result<Vec<PhysRange>> {
    range.validate()?;
    let info = lookup_object(ctx, id).await?;
    let po = ctx.data.per_object(id);
    let mut got: Vec<(u64, u64)> = vec![];

    for page in range.pages() {
        let state = { po.lock().await.pages.get(&page).copied() };
        if let Some(PageState::Resident { phys, .. }) = state {
            ctx.ledger.mark(phys, PageFlags::ACCESSED | PageFlags::MAPPED);
            got.push((page, phys));
            continue;
        }

        // Assemble content and allocate without holding the object lock, so
        // eviction and source reads stay deadlock-free.
        let mut buf = vec![0u8; PAGE as usize];
        let prepared = match prepare_page(ctx, id, &info, state, page, &mut buf).await {
            Ok(p) => p,
            Err(e) if !got.is_empty() => {
                tracing::warn!("partial fetch of {}: page {} failed: {}", id, page, e);
                break;
            }
            Err(e) => return Err(e),
        };
        let phys = match grab_page(ctx).await {
            Ok(phys) => phys,
            Err(PagerError::OutOfMemory) if !got.is_empty() => break,
            Err(e) => return Err(e),
        };

        let mut guard = po.lock().await;
        match guard.pages.get(&page).copied() {
            Some(PageState::Resident { phys: winner, .. }) => {
                // Raced with another fault on the same page.
                ctx.ledger.free_page(phys);
                ctx.ledger.mark(winner, PageFlags::ACCESSED | PageFlags::MAPPED);
                got.push((page, winner));
            }
            _ => {
                if let Err(e) = ctx.arena.write_page(phys, &buf) {
                    ctx.ledger.free_page(phys);
                    if got.is_empty() {
                        return Err(e);
                    }
                    break;
                }
                ctx.ledger.set_owner(phys, id, page);
                let mut flags = PageFlags::MAPPED | PageFlags::ACCESSED;
                let from_swap = match prepared {
                    // A swapped-out page was dirty by definition and has not
                    // reached canonical storage yet.
                    Prepared::FromSwap(slot) => {
                        flags |= PageFlags::DIRTY;
                        Some(slot)
                    }
                    Prepared::Fresh { dirty } => {
                        if dirty {
                            flags |= PageFlags::DIRTY;
                        }
                        None
                    }
                };
                ctx.ledger.set_flags(phys, flags);
                guard.pages.insert(
                    page,
                    PageState::Resident {
                        phys,
                        forgotten: false,
                    },
                );
                if let Some(slot) = from_swap {
                    ctx.store.free_swap(slot);
                }
                if flags.contains(PageFlags::DIRTY) {
                    // Materializing consumed any chain coverage of this page;
                    // the resident copy is now the owned truth.
                    ctx.cow.clear(id, helpers::page_to_range(page));
                }
                got.push((page, phys));
            }
        }
    }

    ctx.data.stats.pages_fetched(got.len());
    Ok(helpers::coalesce_phys(&got))
}

pub(crate) fn combined_dirty(ctx: &PagerContext, phys: u64, forgotten: bool) -> Result<bool> {
    if forgotten {
        return Ok(false);
    }
    let shadow = ctx.ledger.flags(phys);
    let published = ctx.arena.kernel_flags(phys)?;
    Ok((shadow | published).contains(PageFlags::DIRTY))
}

/// Write every dirty page of `range` back to the object's canonical storage,
/// in place. This is the only path that writes canonical bytes. One sync per
/// object runs at a time.
pub async fn sync_range(ctx: &PagerContext, id: ObjID, range: ObjectRange) -> Result<usize> {
    range.validate()?;
    let info = lookup_object(ctx, id).await?;
    let aligned = helpers::page_align(range);

    // Materialize chain-backed pages first, so every source byte is present
    // before it must land in canonical storage.
    if ctx.cow.has_entries(id, aligned) {
        fetch(ctx, id, aligned).await?;
        if ctx.cow.has_entries(id, aligned) {
            return Err(PagerError::OutOfMemory);
        }
    }

    // A volatile object has no canonical location; materializing pending
    // chains is all a sync can do for it.
    if info.lifetime != pager_abi::Lifetime::Persistent {
        return Ok(0);
    }

    let po = ctx.data.per_object(id);
    let mut guard = po.lock().await;
    while guard.syncing {
        po.condvar().wait_no_relock(guard).await;
        guard = po.lock().await;
    }
    guard.syncing = true;

    enum Work {
        // A run of consecutive dirty object pages and their physical pages,
        // written back with a single canonical write.
        Dram { start: u64, phys: Vec<u64> },
        Swap { page: u64, slot: SwapSlot },
    }
    let mut raw = vec![];
    let mut collect_err = None;
    for page in aligned.pages() {
        match guard.pages.get(&page).copied() {
            Some(PageState::Resident { phys, forgotten }) => {
                match combined_dirty(ctx, phys, forgotten) {
                    Ok(true) => raw.push(Work::Dram {
                        start: page,
                        phys: vec![phys],
                    }),
                    Ok(false) => {}
                    Err(e) => {
                        collect_err = Some(e);
                        break;
                    }
                }
            }
            Some(PageState::Evicted { swap: Some(slot) }) => {
                raw.push(Work::Swap { page, slot })
            }
            _ => {}
        }
    }
    drop(guard);
    let work = raw
        .into_iter()
        .coalesce(|a, b| match (a, b) {
            (Work::Dram { start, mut phys }, Work::Dram { start: next, phys: more })
                if start + phys.len() as u64 == next =>
            {
                phys.extend(more);
                Ok(Work::Dram { start, phys })
            }
            (a, b) => Err((a, b)),
        })
        .collect::<Vec<_>>();

    let mut synced = vec![];
    let mut failed = collect_err;
    if failed.is_none() {
        'work: for item in &work {
            let res = match item {
                Work::Dram { start, phys } => {
                    let mut buf = vec![0u8; phys.len() * PAGE as usize];
                    for (i, p) in phys.iter().enumerate() {
                        if let Err(e) = ctx
                            .arena
                            .read_page(*p, &mut buf[i * PAGE as usize..(i + 1) * PAGE as usize])
                        {
                            failed = Some(e);
                            break 'work;
                        }
                    }
                    write_back(ctx, id, start * PAGE, &buf).await.map(|_| {
                        for p in phys {
                            ctx.ledger.clear(*p, PageFlags::DIRTY);
                        }
                    })
                }
                Work::Swap { page, slot } => {
                    let mut buf = vec![0u8; PAGE as usize];
                    match ctx.store.read_swap(*slot, &mut buf).await {
                        Ok(()) => write_back(ctx, id, page * PAGE, &buf).await,
                        Err(e) => Err(e),
                    }
                }
            };
            match res {
                Ok(()) => synced.push(item),
                Err(e) => {
                    failed = Some(e);
                    break;
                }
            }
        }
    }

    let mut guard = po.lock().await;
    let mut nr_synced = 0;
    for item in &synced {
        match item {
            Work::Dram { start, phys } => {
                for page in *start..*start + phys.len() as u64 {
                    if let Some(PageState::Resident { forgotten, .. }) =
                        guard.pages.get_mut(&page)
                    {
                        *forgotten = false;
                    }
                }
                nr_synced += phys.len();
            }
            Work::Swap { page, slot } => {
                // Canonical storage is now current; the swap copy is stale.
                ctx.store.free_swap(*slot);
                guard.pages.insert(*page, PageState::Evicted { swap: None });
                nr_synced += 1;
            }
        }
    }
    guard.version += 1;
    guard.syncing = false;
    po.condvar().notify_all();
    drop(guard);

    ctx.data.stats.pages_synced(nr_synced);
    match failed {
        None => Ok(nr_synced),
        Some(e) => Err(e),
    }
}

/// Drop every cached copy of `range` without write-back. Resident pages go
/// through a discard eviction so the kernel unmaps them first.
async fn drop_cached(ctx: &PagerContext, id: ObjID, aligned: ObjectRange) -> Result<()> {
    let po = ctx.data.per_object(id);
    let victims: Vec<(u64, u64)> = {
        let mut guard = po.lock().await;
        let mut victims = vec![];
        for page in aligned.pages() {
            match guard.pages.get(&page).copied() {
                Some(PageState::Resident { phys, .. }) => victims.push((page, phys)),
                Some(PageState::Evicted { swap }) => {
                    if let Some(slot) = swap {
                        ctx.store.free_swap(slot);
                    }
                    guard.pages.remove(&page);
                }
                None => {}
            }
        }
        victims
    };
    if !victims.is_empty() {
        crate::evict::evict_pages(ctx, &po, &victims, true).await?;
    }
    Ok(())
}

/// Drop a range entirely: pending writes are lost and the next fault reads
/// fresh zero pages. Nothing is written back.
pub async fn discard(ctx: &PagerContext, id: ObjID, range: ObjectRange) -> Result<()> {
    range.validate()?;
    let aligned = helpers::page_align(range);
    drop_cached(ctx, id, aligned).await?;
    ctx.cow.record_zero(id, aligned);
    Ok(())
}

/// Record a copy command, from either protocol surface. Classification only
/// consults lifetimes; no bytes move until a fault or sync needs them.
pub async fn apply_copy(ctx: &PagerContext, cmd: &pager_abi::CopyCmd) -> Result<()> {
    cmd.validate()?;
    let src_lifetime = if cmd.is_zero_fill() {
        None
    } else {
        Some(lookup_object(ctx, cmd.src).await?.lifetime)
    };
    let dst_lifetime = lookup_object(ctx, cmd.dst).await?.lifetime;
    let variant = crate::cow::classify(src_lifetime, dst_lifetime)?;
    tracing::debug!("copy {} -> {}: {:?}", cmd.src, cmd.dst, variant);
    // Cached destination pages are superseded by the copy; drop them so the
    // chain is what the next fault sees.
    drop_cached(ctx, cmd.dst, helpers::page_align(cmd.dst_range())).await?;
    ctx.cow.record(cmd)
}

/// Clear dirty state in a range without writing anything back. The caller
/// asserts it has restored the bytes itself.
pub async fn forget_writes(ctx: &PagerContext, id: ObjID, range: ObjectRange) -> Result<()> {
    range.validate()?;
    let aligned = helpers::page_align(range);
    let po = ctx.data.per_object(id);
    let mut guard = po.lock().await;
    for page in aligned.pages() {
        match guard.pages.get_mut(&page) {
            Some(PageState::Resident { phys, forgotten }) => {
                // The published bitmap is kernel-owned and cannot be cleared
                // from here; the mask hides its dirty bit instead.
                *forgotten = true;
                ctx.ledger.clear(*phys, PageFlags::DIRTY);
            }
            Some(state @ PageState::Evicted { swap: Some(_) }) => {
                if let PageState::Evicted { swap: Some(slot) } = *state {
                    ctx.store.free_swap(slot);
                }
                *state = PageState::Evicted { swap: None };
            }
            _ => {}
        }
    }
    Ok(())
}
