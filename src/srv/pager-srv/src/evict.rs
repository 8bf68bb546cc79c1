//! The eviction engine. Eviction never writes canonical storage: a dirty
//! victim goes to a swap slot, and its canonical bytes stay whatever the last
//! sync made them. The kernel round trip both unmaps the pages and reports
//! their authoritative final flags, which override whatever flag snapshot was
//! taken before the request.

use std::collections::HashMap;

use pager_abi::{
    EvictFlags, EvictInfo, ItemList, ObjID, PageFlags, PagerError, Result, NR_RANGES,
};

use crate::data::{self, PageState, PerObject};
use crate::helpers;
use crate::store::SwapSlot;
use crate::PagerContext;

/// A resident page under consideration for eviction.
#[derive(Clone, Copy, Debug)]
pub struct Victim {
    pub id: ObjID,
    pub page: u64,
    pub phys: u64,
    pub flags: PageFlags,
}

/// Chooses which candidates to evict. Implementations are consulted with the
/// full candidate set and return indices into it.
pub trait EvictionPolicy: Send {
    fn pick(&mut self, candidates: &[Victim], max: usize) -> Vec<usize>;
}

/// Second-chance selection: clean unaccessed pages go first, then unaccessed,
/// then clean, then anything. Survivors get their accessed bit cleared by the
/// engine, which is what grants the second chance.
#[derive(Default)]
pub struct ClockPolicy;

impl EvictionPolicy for ClockPolicy {
    fn pick(&mut self, candidates: &[Victim], max: usize) -> Vec<usize> {
        let score = |v: &Victim| {
            let accessed = v.flags.contains(PageFlags::ACCESSED) as u32;
            let dirty = v.flags.contains(PageFlags::DIRTY) as u32;
            accessed * 2 + dirty
        };
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by_key(|&i| score(&candidates[i]));
        order.truncate(max);
        order
    }
}

/// Scan for victims, consult the policy, and evict up to one batch. Returns
/// the number of pages freed; `Ok(0)` means everything evictable was busy and
/// the caller should wait rather than fail.
pub async fn relieve_pressure(ctx: &PagerContext) -> Result<usize> {
    let batch = ctx.config.evict_batch.max(1);
    let mut candidates = vec![];
    let mut skipped_busy = false;

    for po in ctx.data.objects() {
        let Some(guard) = po.try_lock() else {
            skipped_busy = true;
            continue;
        };
        for (&page, state) in &guard.pages {
            if let PageState::Resident { phys, forgotten } = *state {
                let mut flags =
                    ctx.ledger.flags(phys) | ctx.arena.kernel_flags(phys).unwrap_or_default();
                if forgotten {
                    flags -= PageFlags::DIRTY;
                }
                if flags.contains(PageFlags::PINNED) {
                    continue;
                }
                candidates.push(Victim {
                    id: po.id(),
                    page,
                    phys,
                    flags,
                });
            }
        }
    }

    if candidates.is_empty() {
        return if skipped_busy {
            Ok(0)
        } else {
            Err(PagerError::OutOfMemory)
        };
    }

    let picks = {
        let mut policy = ctx.policy.lock().unwrap();
        policy.pick(&candidates, batch)
    };
    for (i, c) in candidates.iter().enumerate() {
        if !picks.contains(&i) {
            ctx.ledger.clear(c.phys, PageFlags::ACCESSED);
        }
    }

    let mut by_obj: HashMap<ObjID, Vec<(u64, u64)>> = HashMap::new();
    for i in picks {
        let c = candidates[i];
        by_obj.entry(c.id).or_default().push((c.page, c.phys));
    }

    let mut freed = 0;
    let mut last_err = None;
    for (id, pages) in by_obj {
        let po = ctx.data.per_object(id);
        match evict_pages(ctx, &po, &pages, false).await {
            Ok(n) => freed += n,
            Err(e) => {
                tracing::warn!("eviction of {} pages of {} failed: {}", pages.len(), id, e);
                last_err = Some(e);
            }
        }
    }

    if freed == 0 {
        if skipped_busy {
            Ok(0)
        } else {
            Err(last_err.unwrap_or(PagerError::OutOfMemory))
        }
    } else {
        Ok(freed)
    }
}

/// Evict the given resident pages of one object. Holds the object lock for
/// the whole operation, kernel round trip included, so faults on these pages
/// wait for the outcome. With `discard`, pending writes are dropped and no
/// swap copies are made.
pub async fn evict_pages(
    ctx: &PagerContext,
    po: &PerObject,
    pages: &[(u64, u64)],
    discard: bool,
) -> Result<usize> {
    let mut guard = po.lock().await;

    // Candidates were gathered before this lock; keep only pages that are
    // still resident where we saw them.
    let mut victims: Vec<(u64, u64, bool)> = pages
        .iter()
        .filter_map(|&(page, phys)| match guard.pages.get(&page) {
            Some(&PageState::Resident {
                phys: cur,
                forgotten,
            }) if cur == phys => Some((page, phys, forgotten)),
            _ => None,
        })
        .collect();
    if victims.is_empty() {
        return Ok(0);
    }
    victims.sort_by_key(|v| v.0);

    for &(_, phys, _) in &victims {
        ctx.ledger.clear(phys, PageFlags::MAPPED);
    }

    // Dirty victims are stashed in swap before the kernel is told anything,
    // so an unmap can never lose the only copy of a write.
    let mut swapped: HashMap<u64, SwapSlot> = HashMap::new();
    if !discard {
        let mut buf = vec![0u8; helpers::PAGE as usize];
        let mut failed = None;
        let mut aborted = vec![];
        for &(page, phys, forgotten) in &victims {
            if !data::combined_dirty(ctx, phys, forgotten).unwrap_or(true) {
                continue;
            }
            let res = match ctx.arena.read_page(phys, &mut buf) {
                Ok(()) => data::write_swap(ctx, &buf).await,
                Err(e) => Err(e),
            };
            match res {
                Ok(slot) => {
                    swapped.insert(page, slot);
                }
                Err(e) => {
                    // This victim stays resident and dirty.
                    ctx.ledger.mark(phys, PageFlags::MAPPED);
                    aborted.push(page);
                    failed = Some(e);
                }
            }
        }
        victims.retain(|v| !aborted.contains(&v.0));
        if victims.is_empty() {
            return Err(failed.unwrap_or(PagerError::StorageIo));
        }
    }

    let victim_pages: Vec<u64> = victims.iter().map(|v| v.0).collect();
    let ranges = helpers::coalesce_pages(&victim_pages);
    let mut final_flags: HashMap<u64, PageFlags> = HashMap::new();
    let mut submit_err = None;
    for chunk in ranges.chunks(NR_RANGES) {
        let info = EvictInfo {
            obj_id: po.id(),
            ranges: ItemList::from_slice(chunk)?,
            flags: if discard {
                EvictFlags::DISCARD
            } else {
                EvictFlags::empty()
            },
            version: guard.version,
        };
        match crate::kernel::submit_evict(ctx, info).await {
            Ok(stats) => {
                for (i, range) in chunk.iter().enumerate() {
                    let flags = stats.flags.as_slice().get(i).copied().unwrap_or_default();
                    for page in range.pages() {
                        final_flags.insert(page, flags);
                    }
                }
            }
            Err(e) => {
                submit_err = Some(e);
                break;
            }
        }
    }
    if submit_err.is_some() {
        // Pages in chunks the kernel never acknowledged stay resident and
        // mapped; their swap copies are stale and go back to the pool.
        // Chunks that did complete are unmapped kernel-side and must still
        // be reclaimed below.
        for &(page, phys, _) in &victims {
            if !final_flags.contains_key(&page) {
                ctx.ledger.mark(phys, PageFlags::MAPPED);
                if let Some(slot) = swapped.remove(&page) {
                    ctx.store.free_swap(slot);
                }
            }
        }
    }

    let mut freed = 0;
    let mut buf = vec![0u8; helpers::PAGE as usize];
    for (page, phys, _) in victims {
        if submit_err.is_some() && !final_flags.contains_key(&page) {
            continue;
        }
        // The completion's flags are the truth; the pre-unmap snapshot may
        // have missed a late write.
        let flags = final_flags.get(&page).copied().unwrap_or_default();
        let mut slot = swapped.remove(&page);
        if !discard && flags.contains(PageFlags::DIRTY) && slot.is_none() {
            let res = match ctx.arena.read_page(phys, &mut buf) {
                Ok(()) => data::write_swap(ctx, &buf).await,
                Err(e) => Err(e),
            };
            match res {
                Ok(s) => slot = Some(s),
                Err(e) => {
                    tracing::warn!("late swap of {} page {} failed: {}", po.id(), page, e);
                    ctx.ledger.set_flags(phys, flags | PageFlags::MAPPED);
                    continue;
                }
            }
        }
        ctx.ledger.free_page(phys);
        if discard {
            guard.pages.remove(&page);
        } else {
            guard.pages.insert(page, PageState::Evicted { swap: slot });
        }
        freed += 1;
    }
    guard.version += 1;
    ctx.data.stats.pages_evicted(freed);
    match submit_err {
        Some(e) => Err(e),
        None => Ok(freed),
    }
}
