//! The DRAM the kernel has granted to the pager, modeled as an arena of
//! page-sized slots. Each granted [PhysRange] carries a trailing metadata
//! region with one flag byte per data page; the kernel publishes page status
//! there with release stores, and the pager reads it with acquire loads.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc, Mutex, RwLock,
};

use pager_abi::{PageFlags, PagerError, PhysRange, Result, PAGE_SIZE};

struct Frame {
    range: PhysRange,
    data: Mutex<Box<[u8]>>,
    meta: Box<[AtomicU8]>,
}

impl Frame {
    fn new(range: PhysRange) -> Self {
        let mut meta = Vec::with_capacity(range.nr_pages as usize);
        meta.resize_with(range.nr_pages as usize, || AtomicU8::new(0));
        Self {
            range,
            data: Mutex::new(vec![0u8; range.data_len()].into_boxed_slice()),
            meta: meta.into_boxed_slice(),
        }
    }

    fn first_page(&self) -> u64 {
        self.range.start / PAGE_SIZE
    }

    fn holds(&self, page: u64) -> bool {
        page >= self.first_page() && page < self.first_page() + self.range.nr_pages
    }
}

#[derive(Default)]
pub struct FrameArena {
    frames: RwLock<Vec<Arc<Frame>>>,
}

impl FrameArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a granted range. The data and metadata regions start zeroed.
    pub fn grant(&self, range: &PhysRange) -> Result<()> {
        range.validate()?;
        let mut frames = self.frames.write().unwrap();
        let meta_end = range.meta_start() + range.meta_len() as u64;
        for frame in frames.iter() {
            let other_end = frame.range.meta_start() + frame.range.meta_len() as u64;
            if range.start < other_end && frame.range.start < meta_end {
                return Err(PagerError::InvalidRange);
            }
        }
        frames.push(Arc::new(Frame::new(*range)));
        Ok(())
    }

    pub fn contains(&self, page: u64) -> bool {
        self.frames
            .read()
            .unwrap()
            .iter()
            .any(|f| f.holds(page))
    }

    fn locate(&self, page: u64) -> Result<Arc<Frame>> {
        self.frames
            .read()
            .unwrap()
            .iter()
            .find(|f| f.holds(page))
            .cloned()
            .ok_or(PagerError::InvalidRange)
    }

    /// Fill one page slot from `src`, zeroing any tail `src` does not cover.
    pub fn write_page(&self, page: u64, src: &[u8]) -> Result<()> {
        let frame = self.locate(page)?;
        let off = ((page - frame.first_page()) * PAGE_SIZE) as usize;
        let mut data = frame.data.lock().unwrap();
        let take = src.len().min(PAGE_SIZE as usize);
        data[off..off + take].copy_from_slice(&src[..take]);
        data[off + take..off + PAGE_SIZE as usize].fill(0);
        Ok(())
    }

    pub fn read_page(&self, page: u64, out: &mut [u8]) -> Result<()> {
        let frame = self.locate(page)?;
        let off = ((page - frame.first_page()) * PAGE_SIZE) as usize;
        let data = frame.data.lock().unwrap();
        let take = out.len().min(PAGE_SIZE as usize);
        out[..take].copy_from_slice(&data[off..off + take]);
        Ok(())
    }

    pub fn zero_page(&self, page: u64) -> Result<()> {
        self.write_page(page, &[])
    }

    /// Read the kernel-published flags for one page.
    pub fn kernel_flags(&self, page: u64) -> Result<PageFlags> {
        let frame = self.locate(page)?;
        let idx = (page - frame.first_page()) as usize;
        let raw = frame.meta[idx].load(Ordering::Acquire);
        Ok(PageFlags::from_bits_truncate(raw as u32))
    }

    /// Publish flags for one page the way the kernel does. The bitmap is a
    /// one-way contract, kernel-written and pager-read; only the kernel side
    /// of a queue (or a test harness standing in for it) calls this.
    pub fn kernel_mark(&self, page: u64, flags: PageFlags) -> Result<()> {
        let frame = self.locate(page)?;
        let idx = (page - frame.first_page()) as usize;
        frame.meta[idx].fetch_or(flags.bits() as u8, Ordering::Release);
        Ok(())
    }

    /// Kernel-side reset of a page's flag byte, done when its mapping is
    /// retired.
    pub fn kernel_reset(&self, page: u64) -> Result<()> {
        let frame = self.locate(page)?;
        let idx = (page - frame.first_page()) as usize;
        frame.meta[idx].store(0, Ordering::Release);
        Ok(())
    }
}
