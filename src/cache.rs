// this_file: src/cache.rs

//! The generic cache framework: per-cache state and the behavior table
//! each typed cache plugs into it.
//!
//! A cache maps a 32-bit query hash to a chain of nodes through a bucket
//! table whose size follows a fixed ascending prime table. The typed
//! behavior lives behind [`CacheOps`]; queries, families and node payloads
//! cross that boundary type-erased as `dyn Any` and are downcast by the
//! concrete implementation.

use crate::error::Result;
use crate::lru::LruList;
use crate::node::NodeArena;
use crate::sources::{FaceSource, SourceCaches};
use std::any::Any;

/// Identifier of a registered cache inside one manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheId(pub(crate) u16);

/// Behavior table implemented once per concrete payload type.
///
/// All hooks are pure over their inputs plus the face/size sub-caches;
/// the framework owns every linked structure.
pub trait CacheOps<S: FaceSource> {
    /// Build the family for a query that matched no existing family.
    /// This is where expensive per-context work (face/size resolution,
    /// glyph counts) happens once and is amortized across many nodes.
    fn family_init(&self, query: &dyn Any, sources: &mut SourceCaches<S>)
        -> Result<Box<dyn Any>>;

    /// Does `family` cover `query`'s context?
    fn family_compare(&self, family: &dyn Any, query: &dyn Any) -> bool;

    /// Tear down type-specific family state. Payload drop runs afterwards.
    fn family_done(&self, _family: &mut dyn Any) {}

    /// Hash of the query, normalized by its resolved family.
    fn node_hash(&self, family: &dyn Any, query: &dyn Any) -> Result<u32>;

    /// Build the payload for a new node. Failure unwinds fully: the
    /// framework frees the node and leaves all accounting untouched.
    fn node_init(
        &self,
        family: &dyn Any,
        query: &dyn Any,
        sources: &mut SourceCaches<S>,
    ) -> Result<Box<dyn Any>>;

    /// Byte cost of the node: struct plus all owned buffers.
    fn node_weight(&self, node: &dyn Any) -> Result<u64>;

    /// Does `node` satisfy `query`? Returns `Some(added_weight)` on a
    /// match; a lazily materialized item reports its new buffer bytes
    /// through `added_weight` so the manager can account them.
    fn node_compare(
        &self,
        node: &mut dyn Any,
        family: &dyn Any,
        query: &dyn Any,
        sources: &mut SourceCaches<S>,
    ) -> Result<Option<u64>>;

    /// Tear down type-specific node state. Payload drop runs afterwards.
    fn node_done(&self, _node: &mut dyn Any) {}
}

/// Smallest bucket count a cache starts with.
pub(crate) const PRIMES_MIN: u32 = 7;

/// Bucket counts grow (and shrink) along this table; past the last entry
/// the bucket count simply stops growing.
const PRIMES: [u32; 35] = [
    7, 11, 19, 37, 73, 109, 163, 251, 367, 557, 823, 1237, 1861, 2777, 4177, 6247, 9371, 14057,
    21089, 31627, 47431, 71143, 106721, 160073, 240101, 360163, 540217, 810343, 1215497, 1823231,
    2734867, 4102283, 6153409, 9230113, 13845163,
];

fn resize_test(nodes: u64, size: u64) -> bool {
    nodes * 3 < size || size * 3 < nodes
}

/// Closest prime in the table strictly above `num`, saturating at the
/// table's maximum.
fn prime_closest(num: u32) -> u32 {
    for &p in PRIMES.iter() {
        if p > num {
            return p;
        }
    }
    PRIMES[PRIMES.len() - 1]
}

/// Per-cache framework state: bucket table, family recency list, and the
/// typed behavior table.
pub(crate) struct CacheShell<S: FaceSource> {
    pub id: u16,
    pub buckets: Vec<Option<u32>>,
    /// Nodes currently linked in this cache's buckets.
    pub node_count: u32,
    /// Family-table slots of this cache's families, most recent first.
    /// Unbounded; entries are removed when their node count reaches zero.
    pub family_lru: LruList<u32>,
    pub ops: Box<dyn CacheOps<S>>,
}

impl<S: FaceSource> CacheShell<S> {
    pub fn new(id: u16, ops: Box<dyn CacheOps<S>>) -> Self {
        Self {
            id,
            buckets: vec![None; PRIMES_MIN as usize],
            node_count: 0,
            family_lru: LruList::new(0),
            ops,
        }
    }

    pub fn bucket_index(&self, hash: u32) -> usize {
        (hash % self.buckets.len() as u32) as usize
    }

    /// Unlink a node from its bucket chain. A node missing from its
    /// expected bucket is an internal invariant violation.
    pub fn bucket_unlink(&mut self, index: u32, nodes: &mut NodeArena) -> Result<()> {
        let bucket = self.bucket_index(nodes.body(index)?.hash);
        let mut cursor = self.buckets[bucket];
        let mut prev: Option<u32> = None;

        while let Some(current) = cursor {
            let next = nodes.body(current)?.bucket_next;
            if current == index {
                match prev {
                    Some(p) => nodes.body_mut(p)?.bucket_next = next,
                    None => self.buckets[bucket] = next,
                }
                nodes.body_mut(index)?.bucket_next = None;
                self.node_count -= 1;
                return Ok(());
            }
            prev = Some(current);
            cursor = next;
        }

        log::error!("cache {}: node {} not found in its bucket", self.id, index);
        Err(crate::error::Error::CorruptedCache(
            "node not found in its expected bucket",
        ))
    }

    /// True when the bucket table is badly sized for the node count.
    pub fn needs_resize(&self) -> bool {
        resize_test(self.node_count as u64, self.buckets.len() as u64)
    }

    /// Rebuild the bucket table at the prime closest to the node count,
    /// rehashing every node from its cached hash field.
    pub fn resize(&mut self, nodes: &mut NodeArena) -> Result<()> {
        let new_size = prime_closest(self.node_count);
        if new_size as usize == self.buckets.len() {
            return Ok(());
        }

        log::trace!(
            "cache {}: resizing {} -> {} buckets for {} nodes",
            self.id,
            self.buckets.len(),
            new_size,
            self.node_count
        );

        let old = std::mem::replace(&mut self.buckets, vec![None; new_size as usize]);
        for mut cursor in old {
            while let Some(index) = cursor {
                let body = nodes.body_mut(index)?;
                cursor = body.bucket_next.take();
                let bucket = (body.hash % new_size) as usize;
                let head = self.buckets[bucket];
                nodes.body_mut(index)?.bucket_next = head;
                self.buckets[bucket] = Some(index);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prime_closest_walks_the_table() {
        assert_eq!(prime_closest(0), 7);
        assert_eq!(prime_closest(7), 11);
        assert_eq!(prime_closest(100), 109);
        // saturates at the table maximum
        assert_eq!(prime_closest(u32::MAX), 13845163);
    }

    #[test]
    fn resize_test_tracks_both_directions() {
        // far too many nodes for the buckets
        assert!(resize_test(22, 7));
        assert!(!resize_test(10, 7));
        // far too few nodes for the buckets
        assert!(resize_test(2, 11));
        assert!(!resize_test(3, 7));
    }
}
