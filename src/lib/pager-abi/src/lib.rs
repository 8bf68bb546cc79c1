//! Wire-protocol types shared between the kernel, the pager, and paging-aware
//! applications. Everything that crosses a queue is `#[repr(C)]`, `Copy`, and
//! fixed-size, since queue entries live in shared memory.

pub mod error;

pub use error::{ErrorCode, PagerError, Result};

/// The unit of paging, in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// Maximum number of object ranges batched into one request.
pub const NR_RANGES: usize = 8;
/// Maximum number of physical ranges batched into one request.
pub const NR_PHYS_RANGES: usize = 4;
/// Maximum number of sync commands batched into one request.
pub const NR_SYNC_RANGES: usize = 8;

/// A 128-bit global object identifier. The zero id is reserved: as a copy
/// source it means "zero-fill".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ObjID(u128);

impl ObjID {
    pub const fn new(raw: u128) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u128 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl From<u128> for ObjID {
    fn from(raw: u128) -> Self {
        Self(raw)
    }
}

impl core::fmt::Display for ObjID {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// A byte-addressed interval within one object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(C)]
pub struct ObjectRange {
    pub start: u64,
    pub len: u64,
}

impl ObjectRange {
    pub fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    /// Numbers of the pages this range touches.
    pub fn pages(&self) -> impl Iterator<Item = u64> {
        let first = self.start / PAGE_SIZE;
        let last = self.end().div_ceil(PAGE_SIZE);
        first..last
    }

    pub fn page_count(&self) -> usize {
        self.pages().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end()
    }

    pub fn overlaps(&self, other: &ObjectRange) -> bool {
        self.start < other.end() && other.start < self.end()
    }

    /// A range is malformed if it is empty or its page-aligned end
    /// overflows.
    pub fn validate(&self) -> Result<(), PagerError> {
        let Some(end) = self.start.checked_add(self.len) else {
            return Err(PagerError::InvalidRange);
        };
        if self.len == 0 || end.div_ceil(PAGE_SIZE).checked_mul(PAGE_SIZE).is_none() {
            return Err(PagerError::InvalidRange);
        }
        Ok(())
    }

    pub fn is_page_aligned(&self) -> bool {
        self.start % PAGE_SIZE == 0 && self.len % PAGE_SIZE == 0
    }
}

/// A contiguous run of physical pages owned by the pager, with a trailing
/// metadata region holding the kernel-written per-page flag bytes. The
/// metadata always follows the data pages so the data region keeps its
/// alignment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(C)]
pub struct PhysRange {
    pub start: u64,
    pub nr_pages: u64,
    pub meta_nr_pages: u32,
    pub reserved: u32,
}

impl PhysRange {
    pub fn new(start: u64, nr_pages: u64) -> Self {
        let meta_nr_pages = nr_pages.div_ceil(PAGE_SIZE) as u32;
        Self {
            start,
            nr_pages,
            meta_nr_pages,
            reserved: 0,
        }
    }

    /// A bare run of data pages with no metadata region, as carried in
    /// page-info completions.
    pub const fn data_only(start: u64, nr_pages: u64) -> Self {
        Self {
            start,
            nr_pages,
            meta_nr_pages: 0,
            reserved: 0,
        }
    }

    /// Numbers of the data pages in this range.
    pub fn pages(&self) -> impl Iterator<Item = u64> {
        let first = self.start / PAGE_SIZE;
        first..first + self.nr_pages
    }

    pub fn data_len(&self) -> usize {
        (self.nr_pages * PAGE_SIZE) as usize
    }

    /// Byte address of the flag metadata region, directly after the data.
    pub fn meta_start(&self) -> u64 {
        self.start + self.nr_pages * PAGE_SIZE
    }

    pub fn meta_len(&self) -> usize {
        (self.meta_nr_pages as u64 * PAGE_SIZE) as usize
    }

    pub fn validate(&self) -> Result<(), PagerError> {
        if self.start % PAGE_SIZE != 0 || self.nr_pages == 0 {
            return Err(PagerError::InvalidRange);
        }
        // One flag byte per data page must fit in the metadata region.
        if (self.meta_nr_pages as u64) * PAGE_SIZE < self.nr_pages {
            return Err(PagerError::InvalidRange);
        }
        if self
            .start
            .checked_add((self.nr_pages + self.meta_nr_pages as u64) * PAGE_SIZE)
            .is_none()
        {
            return Err(PagerError::InvalidRange);
        }
        Ok(())
    }
}

bitflags::bitflags! {
    /// Per-page status flags. The kernel publishes these in the metadata
    /// region of a [PhysRange]; the pager mirrors them in its ledger.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct PageFlags: u32 {
        const DIRTY = 1 << 0;
        const ACCESSED = 1 << 1;
        const MAPPED = 1 << 2;
        const SHARED = 1 << 3;
        const PINNED = 1 << 4;
    }
}

bitflags::bitflags! {
    /// Ordering constraints a user request places on its queue.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct BarrierFlags: u32 {
        /// Must not be reordered ahead of earlier requests.
        const BLOCK_BEFORE = 1 << 0;
        /// Later requests must not be reordered ahead of this one.
        const BLOCK_AFTER = 1 << 1;
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct EvictFlags: u32 {
        /// The pages are being dropped, not written back; the kernel need not
        /// report final dirty state.
        const DISCARD = 1 << 0;
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct KernelCompletionFlags: u32 {
        /// This completion finishes the exchange.
        const DONE = 1 << 0;
    }
}

/// Lifetime class of an object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum Lifetime {
    #[default]
    Volatile = 0,
    Persistent = 1,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum BackingType {
    #[default]
    Normal = 0,
}

/// Cached descriptor for an object: its lifetime class and an opaque handle
/// naming its canonical storage extent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(C)]
pub struct ObjectInfo {
    pub obj_id: ObjID,
    pub lifetime: Lifetime,
    pub backing: BackingType,
    pub extent: u64,
}

impl ObjectInfo {
    pub fn new(obj_id: ObjID, lifetime: Lifetime, backing: BackingType, extent: u64) -> Self {
        Self {
            obj_id,
            lifetime,
            backing,
            extent,
        }
    }
}

/// A copy-from command. `src == 0` means the destination range is zero-filled
/// rather than sourced from another object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(C)]
pub struct CopyCmd {
    pub src: ObjID,
    pub dst: ObjID,
    pub len: u64,
    pub src_start: u64,
    pub dst_start: u64,
}

impl CopyCmd {
    pub fn is_zero_fill(&self) -> bool {
        self.src.is_zero()
    }

    pub fn src_range(&self) -> ObjectRange {
        ObjectRange::new(self.src_start, self.len)
    }

    pub fn dst_range(&self) -> ObjectRange {
        ObjectRange::new(self.dst_start, self.len)
    }

    pub fn validate(&self) -> Result<(), PagerError> {
        if self.dst.is_zero() {
            return Err(PagerError::InvalidRange);
        }
        self.dst_range().validate()?;
        if !self.is_zero_fill() {
            self.src_range().validate()?;
        }
        Ok(())
    }
}

/// One range of one object to be written back in place.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(C)]
pub struct SyncCmd {
    pub obj_id: ObjID,
    pub range: ObjectRange,
}

impl SyncCmd {
    pub fn new(obj_id: ObjID, range: ObjectRange) -> Self {
        Self { obj_id, range }
    }
}

/// A fixed-capacity, `Copy`-able list for batching items into a queue entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(C)]
pub struct ItemList<T: Copy + Default, const N: usize> {
    items: [T; N],
    count: u32,
}

impl<T: Copy + Default, const N: usize> Default for ItemList<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default, const N: usize> ItemList<T, N> {
    pub fn new() -> Self {
        Self {
            items: [T::default(); N],
            count: 0,
        }
    }

    pub fn from_slice(items: &[T]) -> Result<Self, PagerError> {
        if items.len() > N {
            return Err(PagerError::InvalidRange);
        }
        let mut this = Self::new();
        for item in items {
            this.push(*item)?;
        }
        Ok(this)
    }

    pub fn push(&mut self, item: T) -> Result<(), PagerError> {
        if self.is_full() {
            return Err(PagerError::InvalidRange);
        }
        self.items[self.count as usize] = item;
        self.count += 1;
        Ok(())
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items[0..self.count as usize]
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count as usize == N
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.as_slice().iter()
    }
}

/// Pager-originated eviction notice: the kernel must unmap these ranges.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct EvictInfo {
    pub obj_id: ObjID,
    pub ranges: ItemList<ObjectRange, NR_RANGES>,
    pub flags: EvictFlags,
    pub version: u64,
}

/// Kernel-reported result of an eviction. `flags[i]` holds the authoritative
/// final flags for the i-th requested range; these take precedence over any
/// bitmap snapshot the pager took before the eviction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct EvictStats {
    pub nr_unmapped: u64,
    pub flags: ItemList<PageFlags, NR_RANGES>,
}

/// Submission data for the kernel to pager queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct RequestFromKernel {
    cmd: KernelCommand,
}

impl RequestFromKernel {
    pub fn new(cmd: KernelCommand) -> Self {
        Self { cmd }
    }

    pub fn cmd(&self) -> KernelCommand {
        self.cmd
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub enum KernelCommand {
    ObjectInfoReq(ObjID),
    PageDataReq(ObjID, ItemList<ObjectRange, NR_RANGES>),
    DramPages(ItemList<PhysRange, NR_PHYS_RANGES>),
    ObjectCopy(CopyCmd),
    ObjectCreate(ObjectInfo),
    ObjectDel(ObjID),
}

/// Completion data for the kernel to pager queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct CompletionToKernel {
    data: KernelCompletionData,
    flags: KernelCompletionFlags,
}

impl CompletionToKernel {
    pub fn new(data: KernelCompletionData, flags: KernelCompletionFlags) -> Self {
        Self { data, flags }
    }

    pub fn data(&self) -> KernelCompletionData {
        self.data
    }

    pub fn flags(&self) -> KernelCompletionFlags {
        self.flags
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub enum KernelCompletionData {
    Okay,
    ObjectInfo(ObjectInfo),
    PageInfo(ItemList<PhysRange, NR_RANGES>),
    Error(ErrorCode),
}

/// Submission data for the pager to kernel queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct RequestFromPager {
    cmd: PagerRequest,
}

impl RequestFromPager {
    pub fn new(cmd: PagerRequest) -> Self {
        Self { cmd }
    }

    pub fn cmd(&self) -> PagerRequest {
        self.cmd
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub enum PagerRequest {
    /// Startup handshake; the completion carries the initial DRAM grant.
    Ready,
    Evict(EvictInfo),
    ObjectCopy(CopyCmd),
    Prefetch(ObjID, ObjectRange, PhysRange),
    /// Unsolicited object-info push. The kernel may ignore it.
    ObjectInfo(ObjectInfo),
}

/// Completion data for the pager to kernel queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct CompletionToPager {
    data: PagerCompletionData,
}

impl CompletionToPager {
    pub fn new(data: PagerCompletionData) -> Self {
        Self { data }
    }

    pub fn data(&self) -> PagerCompletionData {
        self.data
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub enum PagerCompletionData {
    Okay,
    EvictSuccess(EvictStats),
    DramPages(PhysRange),
    Error(ErrorCode),
}

/// Submission data for a user to pager queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct RequestFromUser {
    cmd: UserCommand,
    barrier: BarrierFlags,
}

impl RequestFromUser {
    pub fn new(cmd: UserCommand) -> Self {
        Self {
            cmd,
            barrier: BarrierFlags::empty(),
        }
    }

    pub fn with_barrier(cmd: UserCommand, barrier: BarrierFlags) -> Self {
        Self { cmd, barrier }
    }

    pub fn cmd(&self) -> UserCommand {
        self.cmd
    }

    pub fn barrier(&self) -> BarrierFlags {
        self.barrier
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub enum UserCommand {
    ObjectInfoReq(ObjID),
    Prefetch(ObjID, ItemList<ObjectRange, NR_RANGES>),
    Sync(ItemList<SyncCmd, NR_SYNC_RANGES>),
    Discard(ObjID, ItemList<ObjectRange, NR_RANGES>),
    ForgetWrites(ObjID, ItemList<ObjectRange, NR_RANGES>),
    ObjectCopy(CopyCmd),
}

/// Completion data for a user to pager queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct CompletionToUser {
    data: UserCompletionData,
}

impl CompletionToUser {
    pub fn new(data: UserCompletionData) -> Self {
        Self { data }
    }

    pub fn data(&self) -> UserCompletionData {
        self.data
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub enum UserCompletionData {
    Okay,
    ObjectInfo(ObjectInfo),
    Error(ErrorCode),
}
