//! Copy-from bookkeeping. A copy command does not move bytes; it records that
//! a destination range is sourced from another object (or from zeros) until a
//! fault or sync materializes it. Entries form a DAG across objects; a
//! resolution that revisits an entry fails with [PagerError::CopyConflict].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use pager_abi::{CopyCmd, Lifetime, ObjID, ObjectRange, PagerError, Result};
use slab::Slab;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChainSource {
    Zero,
    Object { id: ObjID, start: u64 },
}

#[derive(Clone, Copy, Debug)]
struct Node {
    dst_start: u64,
    len: u64,
    src: ChainSource,
}

impl Node {
    fn end(&self) -> u64 {
        self.dst_start + self.len
    }
}

/// Where a resolved byte range ultimately comes from. `Source` with
/// `id == dst` means the destination's own canonical bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentSource {
    Zero,
    Source { id: ObjID, start: u64 },
}

/// One resolved piece of a queried range. `offset` is the byte offset within
/// the queried object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub offset: u64,
    pub len: u64,
    pub source: SegmentSource,
}

#[derive(Default)]
struct ChainsInner {
    nodes: Slab<Node>,
    by_dst: HashMap<ObjID, BTreeMap<u64, usize>>,
}

impl ChainsInner {
    /// Remove any chain coverage of `range`, splitting straddling entries.
    /// Entries per object never overlap; this is what maintains that.
    fn carve(&mut self, id: ObjID, range: ObjectRange) {
        let Some(map) = self.by_dst.get_mut(&id) else {
            return;
        };
        let overlapping: Vec<u64> = map
            .range(..range.end())
            .filter(|(_, &idx)| self.nodes[idx].end() > range.start)
            .map(|(&k, _)| k)
            .collect();
        for key in overlapping {
            let Some(idx) = map.remove(&key) else {
                continue;
            };
            let node = self.nodes.remove(idx);
            if node.dst_start < range.start {
                let left = Node {
                    dst_start: node.dst_start,
                    len: range.start - node.dst_start,
                    src: node.src,
                };
                let idx = self.nodes.insert(left);
                map.insert(left.dst_start, idx);
            }
            if node.end() > range.end() {
                let skip = range.end() - node.dst_start;
                let right = Node {
                    dst_start: range.end(),
                    len: node.end() - range.end(),
                    src: match node.src {
                        ChainSource::Zero => ChainSource::Zero,
                        ChainSource::Object { id, start } => ChainSource::Object {
                            id,
                            start: start + skip,
                        },
                    },
                };
                let idx = self.nodes.insert(right);
                map.insert(right.dst_start, idx);
            }
        }
        if map.is_empty() {
            self.by_dst.remove(&id);
        }
    }

    fn insert(&mut self, id: ObjID, node: Node) {
        let idx = self.nodes.insert(node);
        self.by_dst
            .entry(id)
            .or_default()
            .insert(node.dst_start, idx);
    }
}

#[derive(Default)]
pub struct CopyChains {
    inner: Mutex<ChainsInner>,
}

impl CopyChains {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a copy command. A later copy over the same destination range
    /// supersedes the earlier one.
    pub fn record(&self, cmd: &CopyCmd) -> Result<()> {
        cmd.validate()?;
        let src = if cmd.is_zero_fill() {
            ChainSource::Zero
        } else {
            ChainSource::Object {
                id: cmd.src,
                start: cmd.src_start,
            }
        };
        let mut inner = self.inner.lock().unwrap();
        inner.carve(cmd.dst, cmd.dst_range());
        inner.insert(
            cmd.dst,
            Node {
                dst_start: cmd.dst_start,
                len: cmd.len,
                src,
            },
        );
        Ok(())
    }

    /// Record that a range reads as zeros until written.
    pub fn record_zero(&self, id: ObjID, range: ObjectRange) {
        let mut inner = self.inner.lock().unwrap();
        inner.carve(id, range);
        inner.insert(
            id,
            Node {
                dst_start: range.start,
                len: range.len,
                src: ChainSource::Zero,
            },
        );
    }

    /// Drop chain coverage of a range, e.g. once a sync has materialized it.
    pub fn clear(&self, id: ObjID, range: ObjectRange) {
        self.inner.lock().unwrap().carve(id, range);
    }

    /// Drop every entry naming `id` as destination.
    pub fn clear_object(&self, id: ObjID) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(map) = inner.by_dst.remove(&id) {
            for (_, idx) in map {
                inner.nodes.remove(idx);
            }
        }
    }

    pub fn has_entries(&self, id: ObjID, range: ObjectRange) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.by_dst.get(&id).is_some_and(|map| {
            map.range(..range.end())
                .any(|(_, &idx)| inner.nodes[idx].end() > range.start)
        })
    }

    /// Walk the chain DAG and flatten `range` of `id` into segments naming
    /// ultimate sources. Revisiting an entry means the chains form a cycle
    /// (or reconverge), which resolution refuses to follow.
    pub fn resolve(&self, id: ObjID, range: ObjectRange) -> Result<Vec<Segment>> {
        range.validate()?;
        let inner = self.inner.lock().unwrap();
        let mut out = vec![];
        let mut visited = HashSet::new();
        let mut work = vec![(id, range.start, range.len, range.start)];

        while let Some((cur, start, len, out_offset)) = work.pop() {
            let end = start + len;
            let overlapping: Vec<usize> = inner
                .by_dst
                .get(&cur)
                .map(|map| {
                    map.range(..end)
                        .filter(|(_, &idx)| inner.nodes[idx].end() > start)
                        .map(|(_, &idx)| idx)
                        .collect()
                })
                .unwrap_or_default();

            let mut cursor = start;
            for idx in overlapping {
                let node = inner.nodes[idx];
                let ov_start = node.dst_start.max(start);
                let ov_end = node.end().min(end);
                if cursor < ov_start {
                    out.push(Segment {
                        offset: out_offset + (cursor - start),
                        len: ov_start - cursor,
                        source: SegmentSource::Source {
                            id: cur,
                            start: cursor,
                        },
                    });
                }
                match node.src {
                    ChainSource::Zero => out.push(Segment {
                        offset: out_offset + (ov_start - start),
                        len: ov_end - ov_start,
                        source: SegmentSource::Zero,
                    }),
                    ChainSource::Object { id: sid, start: sstart } => {
                        if !visited.insert(idx) {
                            return Err(PagerError::CopyConflict);
                        }
                        work.push((
                            sid,
                            sstart + (ov_start - node.dst_start),
                            ov_end - ov_start,
                            out_offset + (ov_start - start),
                        ));
                    }
                }
                cursor = ov_end;
            }
            if cursor < end {
                out.push(Segment {
                    offset: out_offset + (cursor - start),
                    len: end - cursor,
                    source: SegmentSource::Source {
                        id: cur,
                        start: cursor,
                    },
                });
            }
        }

        out.sort_by_key(|s| s.offset);
        Ok(out)
    }
}

/// How a copy command is classed by the lifetimes of its endpoints. A copy
/// between two volatile objects never reaches the pager; seeing one is a
/// protocol violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyVariant {
    ZeroFill,
    VolatileToPersistent,
    PersistentToVolatile,
    PersistentToPersistent,
}

pub fn classify(src: Option<Lifetime>, dst: Lifetime) -> Result<CopyVariant> {
    match (src, dst) {
        (None, _) => Ok(CopyVariant::ZeroFill),
        (Some(Lifetime::Volatile), Lifetime::Volatile) => Err(PagerError::Protocol),
        (Some(Lifetime::Volatile), Lifetime::Persistent) => Ok(CopyVariant::VolatileToPersistent),
        (Some(Lifetime::Persistent), Lifetime::Volatile) => Ok(CopyVariant::PersistentToVolatile),
        (Some(Lifetime::Persistent), Lifetime::Persistent) => {
            Ok(CopyVariant::PersistentToPersistent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn copy(src: u128, src_start: u64, dst: u128, dst_start: u64, len: u64) -> CopyCmd {
        CopyCmd {
            src: ObjID::new(src),
            dst: ObjID::new(dst),
            len,
            src_start,
            dst_start,
        }
    }

    #[test]
    fn unchained_range_resolves_to_itself() {
        let chains = CopyChains::new();
        let segs = chains
            .resolve(ObjID::new(1), ObjectRange::new(100, 50))
            .unwrap();
        assert_eq!(
            segs,
            vec![Segment {
                offset: 100,
                len: 50,
                source: SegmentSource::Source {
                    id: ObjID::new(1),
                    start: 100
                },
            }]
        );
    }

    #[test]
    fn chain_hop_with_gaps() {
        let chains = CopyChains::new();
        // dst 2 bytes [10, 30) come from object 1 at 500.
        chains.record(&copy(1, 500, 2, 10, 20)).unwrap();

        let segs = chains.resolve(ObjID::new(2), ObjectRange::new(0, 40)).unwrap();
        assert_eq!(segs.len(), 3);
        assert_eq!(
            segs[0].source,
            SegmentSource::Source {
                id: ObjID::new(2),
                start: 0
            }
        );
        assert_eq!(segs[1],
            Segment {
                offset: 10,
                len: 20,
                source: SegmentSource::Source {
                    id: ObjID::new(1),
                    start: 500
                },
            }
        );
        assert_eq!(segs[2].offset, 30);
        assert_eq!(segs[2].len, 10);
    }

    #[test]
    fn transitive_chains_flatten() {
        let chains = CopyChains::new();
        chains.record(&copy(1, 0, 2, 0, 100)).unwrap();
        chains.record(&copy(2, 0, 3, 0, 100)).unwrap();

        let segs = chains.resolve(ObjID::new(3), ObjectRange::new(0, 100)).unwrap();
        assert_eq!(
            segs,
            vec![Segment {
                offset: 0,
                len: 100,
                source: SegmentSource::Source {
                    id: ObjID::new(1),
                    start: 0
                },
            }]
        );
    }

    #[test]
    fn cyclic_chains_conflict() {
        let chains = CopyChains::new();
        chains.record(&copy(1, 0, 2, 0, 100)).unwrap();
        chains.record(&copy(2, 0, 1, 0, 100)).unwrap();

        assert_eq!(
            chains.resolve(ObjID::new(1), ObjectRange::new(0, 50)),
            Err(PagerError::CopyConflict)
        );
    }

    #[test]
    fn later_copy_supersedes_overlap() {
        let chains = CopyChains::new();
        chains.record(&copy(1, 0, 3, 0, 100)).unwrap();
        chains.record(&copy(2, 1000, 3, 40, 20)).unwrap();

        let segs = chains.resolve(ObjID::new(3), ObjectRange::new(0, 100)).unwrap();
        assert_eq!(segs.len(), 3);
        assert_eq!(
            segs[0].source,
            SegmentSource::Source {
                id: ObjID::new(1),
                start: 0
            }
        );
        assert_eq!(segs[0].len, 40);
        assert_eq!(
            segs[1].source,
            SegmentSource::Source {
                id: ObjID::new(2),
                start: 1000
            }
        );
        assert_eq!(
            segs[2],
            Segment {
                offset: 60,
                len: 40,
                source: SegmentSource::Source {
                    id: ObjID::new(1),
                    start: 60
                },
            }
        );
    }

    #[test]
    fn zero_fill_and_clear() {
        let chains = CopyChains::new();
        chains.record(&copy(0, 0, 5, 0, 100)).unwrap();
        let segs = chains.resolve(ObjID::new(5), ObjectRange::new(0, 100)).unwrap();
        assert_eq!(segs[0].source, SegmentSource::Zero);

        chains.clear(ObjID::new(5), ObjectRange::new(0, 100));
        assert!(!chains.has_entries(ObjID::new(5), ObjectRange::new(0, 100)));
    }

    #[test]
    fn volatile_to_volatile_is_rejected() {
        assert_eq!(
            classify(Some(Lifetime::Volatile), Lifetime::Volatile),
            Err(PagerError::Protocol)
        );
        assert_eq!(classify(None, Lifetime::Volatile), Ok(CopyVariant::ZeroFill));
        assert_eq!(
            classify(Some(Lifetime::Persistent), Lifetime::Volatile),
            Ok(CopyVariant::PersistentToVolatile)
        );
    }
}
