//! Physical-page accounting: which granted pages are free, which object page
//! each allocated page holds, and the pager's shadow copy of the per-page
//! flags. The shadow is advisory between evictions; the authoritative flags
//! arrive with each eviction completion.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
    task::{Poll, Waker},
};

use pager_abi::{ObjID, PageFlags, PagerError, PhysRange, Result, PAGE_SIZE};
use stable_vec::StableVec;

/// A granted run of pages, allocated by bumping until exhausted and then by
/// reusing freed pages from a stack.
struct Region {
    first: u64,
    next_unused: u64,
    end: u64,
    free: Vec<u64>,
}

impl Region {
    fn new(range: &PhysRange) -> Self {
        let first = range.start / PAGE_SIZE;
        Self {
            first,
            next_unused: first,
            end: first + range.nr_pages,
            free: vec![],
        }
    }

    fn avail(&self) -> u64 {
        self.end - self.next_unused + self.free.len() as u64
    }

    fn take(&mut self) -> Option<u64> {
        if let Some(page) = self.free.pop() {
            return Some(page);
        }
        if self.next_unused < self.end {
            let page = self.next_unused;
            self.next_unused += 1;
            return Some(page);
        }
        None
    }

    fn holds(&self, page: u64) -> bool {
        page >= self.first && page < self.end
    }
}

#[derive(Clone, Copy, Default)]
struct Entry {
    flags: PageFlags,
    owner: Option<(ObjID, u64)>,
}

#[derive(Default)]
struct LedgerInner {
    regions: Vec<Region>,
    entries: HashMap<u64, Entry>,
    waiters: StableVec<Option<Waker>>,
}

impl LedgerInner {
    fn wake_all(&mut self) {
        for idx in 0..self.waiters.next_push_index() {
            if let Some(slot) = self.waiters.get_mut(idx) {
                if let Some(waker) = slot.take() {
                    waker.wake();
                }
            }
        }
    }

    fn try_alloc(&mut self) -> Option<u64> {
        for region in &mut self.regions {
            if let Some(page) = region.take() {
                self.entries.insert(page, Entry::default());
                return Some(page);
            }
        }
        None
    }
}

#[derive(Clone, Default)]
pub struct PageLedger {
    inner: Arc<Mutex<LedgerInner>>,
}

/// Waits for a free page to appear. Woken by grants and frees; allocation is
/// retried on every poll, so a stolen page just means another wait.
pub struct MemoryWaiter {
    pos: Option<usize>,
    inner: Arc<Mutex<LedgerInner>>,
}

impl Future for MemoryWaiter {
    type Output = u64;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut inner = this.inner.lock().unwrap();
        if let Some(page) = inner.try_alloc() {
            if let Some(pos) = this.pos.take() {
                inner.waiters.remove(pos);
            }
            return Poll::Ready(page);
        }
        match this.pos {
            Some(pos) => {
                inner.waiters[pos] = Some(cx.waker().clone());
            }
            None => {
                this.pos = Some(inner.waiters.push(Some(cx.waker().clone())));
            }
        }
        Poll::Pending
    }
}

impl Drop for MemoryWaiter {
    fn drop(&mut self) {
        if let Some(pos) = self.pos {
            self.inner.lock().unwrap().waiters.remove(pos);
        }
    }
}

impl PageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a granted range and wake anyone waiting for memory.
    pub fn grant(&self, range: &PhysRange) -> Result<()> {
        range.validate()?;
        let mut inner = self.inner.lock().unwrap();
        let region = Region::new(range);
        if inner
            .regions
            .iter()
            .any(|r| region.first < r.end && r.first < region.end)
        {
            return Err(PagerError::InvalidRange);
        }
        inner.regions.push(region);
        inner.wake_all();
        Ok(())
    }

    pub fn avail_pages(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner.regions.iter().map(|r| r.avail()).sum()
    }

    pub fn try_alloc(&self) -> Option<u64> {
        self.inner.lock().unwrap().try_alloc()
    }

    /// Allocate, waiting for a grant or a free if nothing is available now.
    pub fn alloc(&self) -> MemoryWaiter {
        MemoryWaiter {
            pos: None,
            inner: self.inner.clone(),
        }
    }

    /// Return a page to its region and wake waiters. The page's entry is
    /// dropped wholesale.
    pub fn free_page(&self, page: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.remove(&page);
        if let Some(region) = inner.regions.iter_mut().find(|r| r.holds(page)) {
            region.free.push(page);
        }
        inner.wake_all();
    }

    pub fn flags(&self, page: u64) -> PageFlags {
        self.inner
            .lock()
            .unwrap()
            .entries
            .get(&page)
            .map(|e| e.flags)
            .unwrap_or_default()
    }

    pub fn mark(&self, page: u64, flags: PageFlags) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.entry(page).or_default().flags |= flags;
    }

    pub fn clear(&self, page: u64, flags: PageFlags) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.entry(page).or_default().flags -= flags;
    }

    /// Replace the shadow flags outright. Used when an eviction completion
    /// reports the final authoritative state.
    pub fn set_flags(&self, page: u64, flags: PageFlags) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.entry(page).or_default().flags = flags;
    }

    pub fn set_owner(&self, page: u64, id: ObjID, obj_page: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.entry(page).or_default().owner = Some((id, obj_page));
    }

    pub fn owner(&self, page: u64) -> Option<(ObjID, u64)> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .get(&page)
            .and_then(|e| e.owner)
    }
}
