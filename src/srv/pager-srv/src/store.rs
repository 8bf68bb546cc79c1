//! Persistence-writer interface. The pager drives canonical storage and the
//! swap area through [PagedObjectStore]; the in-memory [MemStore] backs tests
//! and volatile-only deployments.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use pager_abi::{ObjID, ObjectInfo, PagerError, Result, PAGE_SIZE};

use crate::helpers::PAGE;

/// Handle to one page-sized slot in the swap area.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SwapSlot(pub u64);

/// The storage collaborator. Canonical reads and writes address object bytes
/// in place; swap slots hold evicted dirty pages off to the side and are never
/// part of an object's canonical extent.
#[async_trait]
pub trait PagedObjectStore: Send + Sync {
    /// Look up the descriptor for an object. `Err(NotFound)` if the store has
    /// never heard of it.
    async fn object_info(&self, id: ObjID) -> Result<ObjectInfo>;

    async fn create_object(&self, info: &ObjectInfo) -> Result<()>;

    async fn delete_object(&self, id: ObjID) -> Result<()>;

    /// Read canonical bytes. Reads beyond what has ever been written return
    /// zeros.
    async fn read_object(&self, id: ObjID, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write canonical bytes in place.
    async fn write_object(&self, id: ObjID, offset: u64, buf: &[u8]) -> Result<()>;

    /// Stash one page in the swap area.
    async fn write_swap(&self, buf: &[u8]) -> Result<SwapSlot>;

    async fn read_swap(&self, slot: SwapSlot, buf: &mut [u8]) -> Result<()>;

    fn free_swap(&self, slot: SwapSlot);
}

#[derive(Default)]
struct StoreObject {
    info: ObjectInfo,
    pages: BTreeMap<u64, Box<[u8]>>,
}

#[derive(Default)]
struct MemStoreInner {
    objects: HashMap<ObjID, StoreObject>,
    swap: HashMap<u64, Box<[u8]>>,
    next_slot: u64,
    fail_object_writes: usize,
    fail_swap_writes: usize,
    write_delay: Option<Duration>,
}

/// An in-memory [PagedObjectStore]. Supports injected write failures and
/// write latency so callers can exercise retry and ordering paths.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemStoreInner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` canonical writes with a storage error.
    pub fn fail_object_writes(&self, n: usize) {
        self.inner.lock().unwrap().fail_object_writes = n;
    }

    /// Fail the next `n` swap writes with a storage error.
    pub fn fail_swap_writes(&self, n: usize) {
        self.inner.lock().unwrap().fail_swap_writes = n;
    }

    /// Delay every canonical write by `d`.
    pub fn set_write_delay(&self, d: Option<Duration>) {
        self.inner.lock().unwrap().write_delay = d;
    }

    /// Number of live swap slots, for assertions.
    pub fn swap_len(&self) -> usize {
        self.inner.lock().unwrap().swap.len()
    }

    /// Read canonical bytes synchronously, for assertions.
    pub fn peek(&self, id: ObjID, offset: u64, buf: &mut [u8]) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let obj = inner.objects.get(&id).ok_or(PagerError::NotFound)?;
        copy_out(&obj.pages, offset, buf);
        Ok(())
    }
}

fn copy_out(pages: &BTreeMap<u64, Box<[u8]>>, offset: u64, buf: &mut [u8]) {
    let mut pos = 0usize;
    while pos < buf.len() {
        let off = offset + pos as u64;
        let page = off / PAGE;
        let in_page = (off % PAGE) as usize;
        let take = ((PAGE as usize) - in_page).min(buf.len() - pos);
        match pages.get(&page) {
            Some(data) => buf[pos..pos + take].copy_from_slice(&data[in_page..in_page + take]),
            None => buf[pos..pos + take].fill(0),
        }
        pos += take;
    }
}

fn copy_in(pages: &mut BTreeMap<u64, Box<[u8]>>, offset: u64, buf: &[u8]) {
    let mut pos = 0usize;
    while pos < buf.len() {
        let off = offset + pos as u64;
        let page = off / PAGE;
        let in_page = (off % PAGE) as usize;
        let take = ((PAGE as usize) - in_page).min(buf.len() - pos);
        let data = pages
            .entry(page)
            .or_insert_with(|| vec![0u8; PAGE_SIZE as usize].into_boxed_slice());
        data[in_page..in_page + take].copy_from_slice(&buf[pos..pos + take]);
        pos += take;
    }
}

#[async_trait]
impl PagedObjectStore for MemStore {
    async fn object_info(&self, id: ObjID) -> Result<ObjectInfo> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(&id)
            .map(|o| o.info)
            .ok_or(PagerError::NotFound)
    }

    async fn create_object(&self, info: &ObjectInfo) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(
            info.obj_id,
            StoreObject {
                info: *info,
                pages: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_object(&self, id: ObjID) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.objects.remove(&id).ok_or(PagerError::NotFound)?;
        Ok(())
    }

    async fn read_object(&self, id: ObjID, offset: u64, buf: &mut [u8]) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let obj = inner.objects.get(&id).ok_or(PagerError::NotFound)?;
        copy_out(&obj.pages, offset, buf);
        Ok(())
    }

    async fn write_object(&self, id: ObjID, offset: u64, buf: &[u8]) -> Result<()> {
        let delay = {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_object_writes > 0 {
                inner.fail_object_writes -= 1;
                return Err(PagerError::StorageIo);
            }
            inner.write_delay
        };
        if let Some(d) = delay {
            async_io::Timer::after(d).await;
        }
        let mut inner = self.inner.lock().unwrap();
        let obj = inner.objects.get_mut(&id).ok_or(PagerError::NotFound)?;
        copy_in(&mut obj.pages, offset, buf);
        Ok(())
    }

    async fn write_swap(&self, buf: &[u8]) -> Result<SwapSlot> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_swap_writes > 0 {
            inner.fail_swap_writes -= 1;
            return Err(PagerError::StorageIo);
        }
        let slot = inner.next_slot;
        inner.next_slot += 1;
        let mut page = vec![0u8; PAGE_SIZE as usize].into_boxed_slice();
        let take = buf.len().min(page.len());
        page[..take].copy_from_slice(&buf[..take]);
        inner.swap.insert(slot, page);
        Ok(SwapSlot(slot))
    }

    async fn read_swap(&self, slot: SwapSlot, buf: &mut [u8]) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let page = inner.swap.get(&slot.0).ok_or(PagerError::NotFound)?;
        let take = buf.len().min(page.len());
        buf[..take].copy_from_slice(&page[..take]);
        Ok(())
    }

    fn free_swap(&self, slot: SwapSlot) {
        self.inner.lock().unwrap().swap.remove(&slot.0);
    }
}

#[cfg(test)]
mod tests {
    use pager_abi::{BackingType, Lifetime};

    use super::*;

    fn info(id: u128) -> ObjectInfo {
        ObjectInfo::new(ObjID::new(id), Lifetime::Persistent, BackingType::Normal, 0)
    }

    #[test]
    fn unwritten_bytes_read_as_zero() {
        async_io::block_on(async {
            let store = MemStore::new();
            store.create_object(&info(1)).await.unwrap();
            store
                .write_object(ObjID::new(1), PAGE + 8, b"hello")
                .await
                .unwrap();

            let mut buf = [0xffu8; 16];
            store
                .read_object(ObjID::new(1), PAGE, &mut buf)
                .await
                .unwrap();
            assert_eq!(&buf[..8], &[0u8; 8]);
            assert_eq!(&buf[8..13], b"hello");
            assert_eq!(&buf[13..], &[0u8; 3]);
        });
    }

    #[test]
    fn swap_slots_are_independent_of_objects() {
        async_io::block_on(async {
            let store = MemStore::new();
            let a = store.write_swap(&[1u8; PAGE_SIZE as usize]).await.unwrap();
            let b = store.write_swap(&[2u8; PAGE_SIZE as usize]).await.unwrap();
            assert_ne!(a, b);

            let mut buf = [0u8; PAGE_SIZE as usize];
            store.read_swap(a, &mut buf).await.unwrap();
            assert_eq!(buf[0], 1);
            store.free_swap(a);
            assert_eq!(
                store.read_swap(a, &mut buf).await,
                Err(PagerError::NotFound)
            );
        });
    }

    #[test]
    fn injected_write_failures_are_consumed() {
        async_io::block_on(async {
            let store = MemStore::new();
            store.create_object(&info(1)).await.unwrap();
            store.fail_object_writes(1);
            assert_eq!(
                store.write_object(ObjID::new(1), 0, &[0u8; 8]).await,
                Err(PagerError::StorageIo)
            );
            assert!(store.write_object(ObjID::new(1), 0, &[0u8; 8]).await.is_ok());
        });
    }
}
