use pager_abi::{ObjectRange, PhysRange, PAGE_SIZE};

pub const PAGE: u64 = PAGE_SIZE;

/// The byte range covered by one object page.
pub fn page_to_range(page: u64) -> ObjectRange {
    ObjectRange::new(page * PAGE, PAGE)
}

/// Widen a byte range to page boundaries.
pub fn page_align(range: ObjectRange) -> ObjectRange {
    let start = (range.start / PAGE) * PAGE;
    let end = range.end().div_ceil(PAGE) * PAGE;
    ObjectRange::new(start, end - start)
}

/// Coalesce fetched (object page, physical page) pairs into physical runs,
/// preserving request order so the receiver can map pages positionally.
pub fn coalesce_phys(pairs: &[(u64, u64)]) -> Vec<PhysRange> {
    use itertools::Itertools;
    pairs
        .iter()
        .map(|&(_, phys)| PhysRange::data_only(phys * PAGE, 1))
        .coalesce(|a, b| {
            if a.start + a.nr_pages * PAGE == b.start {
                Ok(PhysRange::data_only(a.start, a.nr_pages + b.nr_pages))
            } else {
                Err((a, b))
            }
        })
        .collect()
}

/// Coalesce a sorted page list into byte ranges.
pub fn coalesce_pages(pages: &[u64]) -> Vec<ObjectRange> {
    use itertools::Itertools;
    pages
        .iter()
        .map(|&p| page_to_range(p))
        .coalesce(|a, b| {
            if a.end() == b.start {
                Ok(ObjectRange::new(a.start, a.len + b.len))
            } else {
                Err((a, b))
            }
        })
        .collect()
}
