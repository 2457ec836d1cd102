// this_file: src/manager.rs

//! The cache manager.
//!
//! One manager owns everything: the node arena with its global MRU list,
//! the family table, the face/size sub-caches, a fixed registry of typed
//! caches and the running byte budget. All access is single-threaded;
//! `&mut Manager` makes the exclusive-access requirement a compile-time
//! property, and callers needing multi-threaded access must serialize
//! externally.
//!
//! The byte budget is soft: compression only reclaims unpinned nodes, so
//! `cur_weight` can transiently exceed `max_weight` while callers hold
//! references.

use crate::cache::{CacheId, CacheOps, CacheShell};
use crate::error::{Error, Result};
use crate::family::FamilyTable;
use crate::node::{NodeArena, NodeBody, NodeRef};
use crate::sources::{FaceSource, FontDesc, SourceCaches};
use std::any::Any;
use std::rc::Rc;

/// Size of the typed-cache registry.
pub const MAX_CACHES: usize = 8;

/// Construction options for a [`Manager`].
#[derive(Clone, Copy, Debug)]
pub struct ManagerOptions {
    /// Capacity of the face sub-cache.
    pub max_faces: usize,
    /// Capacity of the size sub-cache.
    pub max_sizes: usize,
    /// Byte budget across all typed caches.
    pub max_weight: u64,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            max_faces: 2,
            max_sizes: 4,
            max_weight: 200_000,
        }
    }
}

/// The cache manager. See the module docs.
pub struct Manager<S: FaceSource> {
    max_weight: u64,
    cur_weight: u64,
    nodes: NodeArena,
    families: FamilyTable,
    sources: SourceCaches<S>,
    caches: [Option<CacheShell<S>>; MAX_CACHES],
}

impl<S: FaceSource> Manager<S> {
    /// Create a manager around an external face/size provider.
    pub fn new(provider: S, options: ManagerOptions) -> Self {
        Self {
            max_weight: options.max_weight.max(1),
            cur_weight: 0,
            nodes: NodeArena::new(),
            families: FamilyTable::new(),
            sources: SourceCaches::new(provider, options.max_faces, options.max_sizes),
            caches: std::array::from_fn(|_| None),
        }
    }

    /// Register a typed cache and return its id. The id is embedded in
    /// every node the cache creates, so the manager can map a node back to
    /// its cache without a pointer.
    pub fn register_cache(&mut self, ops: Box<dyn CacheOps<S>>) -> Result<CacheId> {
        for (index, slot) in self.caches.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(CacheShell::new(index as u16, ops));
                return Ok(CacheId(index as u16));
            }
        }
        log::error!("register_cache: all {} registry slots taken", MAX_CACHES);
        Err(Error::TooManyCaches)
    }

    /// Cached lookup of a face object.
    pub fn lookup_face(&mut self, face_id: crate::sources::FaceId) -> Result<Rc<S::Face>> {
        self.sources.lookup_face(face_id)
    }

    /// Cached lookup of a (face, size) pair.
    pub fn lookup_size(&mut self, desc: &FontDesc) -> Result<(Rc<S::Face>, Rc<S::Size>)> {
        self.sources.lookup_size(desc)
    }

    /// Find or create the node answering `query` in the given cache.
    /// The returned handle is unpinned: it stays valid only until the next
    /// operation that can trigger compression.
    pub fn lookup(&mut self, cache: CacheId, query: &dyn Any) -> Result<NodeRef> {
        self.lookup_impl(cache, query, false)
    }

    /// Like [`Manager::lookup`], but the returned node is pinned against
    /// eviction; the caller must [`Manager::unref`] it later.
    pub fn lookup_pinned(&mut self, cache: CacheId, query: &dyn Any) -> Result<NodeRef> {
        self.lookup_impl(cache, query, true)
    }

    fn lookup_impl(&mut self, cache_id: CacheId, query: &dyn Any, pin: bool) -> Result<NodeRef> {
        let (index, hit) = {
            let Manager {
                nodes,
                families,
                sources,
                caches,
                cur_weight,
                ..
            } = self;

            let shell = caches
                .get_mut(cache_id.0 as usize)
                .and_then(Option::as_mut)
                .ok_or_else(|| {
                    Error::InvalidArgument(format!("unknown cache id {}", cache_id.0))
                })?;
            let CacheShell {
                id: shell_id,
                buckets,
                node_count,
                family_lru,
                ops,
            } = shell;
            let ops = ops.as_ref();

            // resolve the query's family, creating it on a miss
            let existing = family_lru
                .touch(|&slot| {
                    families
                        .payload(slot)
                        .map(|family| ops.family_compare(family, query))
                        .unwrap_or(false)
                })
                .copied();
            let (family_slot, fresh_family) = match existing {
                Some(slot) => (slot, false),
                None => {
                    let payload = ops.family_init(query, sources)?;
                    let slot = families.alloc(*shell_id, payload);
                    family_lru.insert(slot);
                    (slot, true)
                }
            };

            // the hash depends on family-specific normalization, so it is
            // only available once the family is resolved
            let hash = ops.node_hash(families.payload(family_slot)?, query)?;
            let bucket = (hash % buckets.len() as u32) as usize;

            // walk the bucket chain
            let mut prev: Option<u32> = None;
            let mut cursor = buckets[bucket];
            let mut found: Option<u32> = None;
            while let Some(current) = cursor {
                let next = nodes.body(current)?.bucket_next;
                let matched = {
                    let body = nodes.body_mut(current)?;
                    if body.family_slot == family_slot {
                        let family = families.payload(family_slot)?;
                        ops.node_compare(body.payload.as_mut(), family, query, sources)?
                    } else {
                        None
                    }
                };
                if let Some(added_weight) = matched {
                    // lazily materialized items report their new bytes here
                    *cur_weight += added_weight;

                    // splice to the front of the bucket chain
                    if let Some(p) = prev {
                        nodes.body_mut(p)?.bucket_next = next;
                        let head = buckets[bucket];
                        nodes.body_mut(current)?.bucket_next = head;
                        buckets[bucket] = Some(current);
                    }
                    found = Some(current);
                    break;
                }
                prev = Some(current);
                cursor = next;
            }

            match found {
                Some(current) => {
                    nodes.mru_up(current)?;
                    (current, true)
                }
                None => {
                    // no match: build a new node. Failure unwinds fully,
                    // including a family this same call just created.
                    let payload =
                        match ops.node_init(families.payload(family_slot)?, query, sources) {
                            Ok(payload) => payload,
                            Err(e) => {
                                if fresh_family {
                                    family_lru.remove(|&s| s == family_slot);
                                    ops.family_done(
                                        families.entry_mut(family_slot)?.payload.as_mut(),
                                    );
                                    families.free(family_slot)?;
                                }
                                return Err(e);
                            }
                        };

                    let index = nodes.insert(NodeBody {
                        cache_id: *shell_id,
                        family_slot,
                        hash,
                        ref_count: 0,
                        bucket_next: None,
                        mru_prev: 0,
                        mru_next: 0,
                        payload,
                    })?;

                    let head = buckets[bucket];
                    nodes.body_mut(index)?.bucket_next = head;
                    buckets[bucket] = Some(index);
                    *node_count += 1;

                    let weight = ops.node_weight(nodes.body(index)?.payload.as_ref())?;
                    *cur_weight += weight;
                    families.entry_mut(family_slot)?.node_count += 1;

                    (index, false)
                }
            }
        };

        if !hit {
            // compress with the new node pinned so it cannot evict itself
            if self.cur_weight >= self.max_weight {
                self.nodes.body_mut(index)?.ref_count += 1;
                let compressed = self.compress();
                self.nodes.body_mut(index)?.ref_count -= 1;
                compressed?;
            }

            let Manager { nodes, caches, .. } = self;
            let shell = caches
                .get_mut(cache_id.0 as usize)
                .and_then(Option::as_mut)
                .ok_or(Error::CorruptedCache("cache vanished during lookup"))?;
            if shell.needs_resize() {
                shell.resize(nodes)?;
            }
        }

        if pin {
            self.nodes.body_mut(index)?.ref_count += 1;
        }
        self.nodes.handle(index)
    }

    /// Borrow a node's typed payload through its handle.
    pub fn payload<T: Any>(&self, node: NodeRef) -> Result<&T> {
        let index = self.nodes.resolve(node)?;
        self.nodes
            .body(index)?
            .payload
            .downcast_ref::<T>()
            .ok_or_else(|| Error::InvalidArgument("node payload has a different type".into()))
    }

    /// Pin a node against eviction.
    pub fn ref_node(&mut self, node: NodeRef) -> Result<()> {
        let index = self.validated(node)?;
        self.nodes.body_mut(index)?.ref_count += 1;
        Ok(())
    }

    /// Release one pin. The node is not destroyed immediately even at a
    /// count of zero; it merely becomes a candidate for the next
    /// compression pass.
    pub fn unref(&mut self, node: NodeRef) -> Result<()> {
        let index = self.validated(node)?;
        self.nodes.body_mut(index)?.ref_count -= 1;
        Ok(())
    }

    /// Resolve a handle and verify the node's family back-reference.
    fn validated(&self, node: NodeRef) -> Result<u32> {
        let index = self.nodes.resolve(node)?;
        let body = self.nodes.body(index)?;
        let entry = self.families.entry(body.family_slot)?;
        if entry.cache_id != body.cache_id {
            log::error!("node {}: family slot owned by another cache", index);
            return Err(Error::CorruptedCache("node family belongs to another cache"));
        }
        Ok(index)
    }

    /// Destroy unreferenced nodes from the MRU tail until the weight
    /// budget is met or only pinned nodes remain.
    pub fn compress(&mut self) -> Result<()> {
        let first = match self.nodes.mru_head() {
            Some(first) => first,
            None => return Ok(()),
        };

        log::debug!(
            "compressing: weight {} / {}, nodes {}",
            self.cur_weight,
            self.max_weight,
            self.nodes.live_count()
        );

        if self.cur_weight < self.max_weight {
            return Ok(());
        }

        // walk backwards from the tail; the head (most recent) is visited
        // last
        let mut node = self.nodes.body(first)?.mru_prev;
        loop {
            let prev = if node == first {
                None
            } else {
                Some(self.nodes.body(node)?.mru_prev)
            };

            if self.nodes.body(node)?.ref_count <= 0 {
                self.destroy_node(node)?;
            }

            match prev {
                Some(p) if self.cur_weight > self.max_weight => node = p,
                _ => break,
            }
        }
        Ok(())
    }

    /// Fully unlink and finalize one node.
    fn destroy_node(&mut self, index: u32) -> Result<()> {
        let Manager {
            nodes,
            families,
            caches,
            cur_weight,
            ..
        } = self;

        let (cache_id, family_slot) = {
            let body = nodes.body(index)?;
            (body.cache_id, body.family_slot)
        };

        // validate the family back-reference before trusting it
        let entry = families.entry(family_slot)?;
        if entry.cache_id != cache_id {
            log::error!("destroy_node: node {} family slot mismatch", index);
            return Err(Error::CorruptedCache("node family belongs to another cache"));
        }

        let shell = caches
            .get_mut(cache_id as usize)
            .and_then(Option::as_mut)
            .ok_or(Error::CorruptedCache("node names an unregistered cache"))?;

        let weight = shell.ops.node_weight(nodes.body(index)?.payload.as_ref())?;
        *cur_weight = cur_weight.saturating_sub(weight);

        shell.bucket_unlink(index, nodes)?;
        let mut body = nodes.remove(index)?;
        shell.ops.node_done(body.payload.as_mut());

        let entry = families.entry_mut(family_slot)?;
        entry.node_count = entry.node_count.saturating_sub(1);
        if entry.node_count == 0 {
            shell.family_lru.remove(|&s| s == family_slot);
            shell.ops.family_done(entry.payload.as_mut());
            families.free(family_slot)?;
        }
        Ok(())
    }

    /// Evict every node of one cache unconditionally, pinned or not, then
    /// drop all of its families.
    pub fn clear(&mut self, cache_id: CacheId) -> Result<()> {
        let Manager {
            nodes,
            families,
            caches,
            cur_weight,
            ..
        } = self;

        let shell = caches
            .get_mut(cache_id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown cache id {}", cache_id.0)))?;
        let CacheShell {
            buckets,
            node_count,
            family_lru,
            ops,
            ..
        } = shell;
        let ops = ops.as_ref();

        for bucket in buckets.iter_mut() {
            let mut cursor = bucket.take();
            while let Some(index) = cursor {
                let mut body = nodes.remove(index)?;
                cursor = body.bucket_next.take();

                let weight = ops.node_weight(body.payload.as_ref())?;
                *cur_weight = cur_weight.saturating_sub(weight);
                ops.node_done(body.payload.as_mut());
            }
        }
        *node_count = 0;

        for slot in family_lru.drain() {
            ops.family_done(families.entry_mut(slot)?.payload.as_mut());
            families.free(slot)?;
        }
        Ok(())
    }

    /// Clear the face and size sub-caches only. Typed caches keep their
    /// nodes; callers invalidating face identifiers must also `clear` the
    /// typed caches that depend on them.
    pub fn reset(&mut self) {
        self.sources.reset();
    }

    /// Tear down every registered cache, then the manager itself.
    pub fn destroy(self) {
        // Drop runs the full teardown
    }

    /// Bytes currently attributed to live nodes.
    pub fn cur_weight(&self) -> u64 {
        self.cur_weight
    }

    /// The configured byte budget.
    pub fn max_weight(&self) -> u64 {
        self.max_weight
    }

    /// Number of live nodes across all caches.
    pub fn node_count(&self) -> u32 {
        self.nodes.live_count()
    }

    /// Access to the face/size sub-caches and the provider.
    pub fn sources_mut(&mut self) -> &mut SourceCaches<S> {
        &mut self.sources
    }

    /// Verify the manager's internal invariants: the weight total matches
    /// the sum over live nodes, the MRU list is circular with exactly
    /// `node_count` entries, and every node's family back-reference is
    /// live and owned by the node's cache.
    ///
    /// Intended for tests and debugging.
    pub fn check(&self) -> Result<()> {
        let mut weight: u64 = 0;
        let mut count: u32 = 0;

        for index in self.nodes.mru_iter() {
            let body = self.nodes.body(index)?;
            let entry = self.families.entry(body.family_slot)?;
            if entry.cache_id != body.cache_id {
                return Err(Error::CorruptedCache("node family belongs to another cache"));
            }
            if entry.node_count == 0 {
                return Err(Error::CorruptedCache("live node references an empty family"));
            }
            let shell = self
                .caches
                .get(body.cache_id as usize)
                .and_then(Option::as_ref)
                .ok_or(Error::CorruptedCache("node names an unregistered cache"))?;
            weight += shell.ops.node_weight(body.payload.as_ref())?;
            count += 1;
            if count > self.nodes.live_count() {
                return Err(Error::CorruptedCache("MRU list longer than node count"));
            }
        }

        if count != self.nodes.live_count() {
            return Err(Error::CorruptedCache("MRU list length != node count"));
        }
        if weight != self.cur_weight {
            log::error!(
                "check: accounted weight {} != tracked weight {}",
                weight,
                self.cur_weight
            );
            return Err(Error::CorruptedCache("weight accounting mismatch"));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn corrupt_family_slot(&mut self, node: NodeRef, slot: u32) {
        let index = self.nodes.resolve(node).unwrap();
        self.nodes.body_mut(index).unwrap().family_slot = slot;
    }
}

impl<S: FaceSource> Drop for Manager<S> {
    fn drop(&mut self) {
        for index in 0..MAX_CACHES {
            if self.caches[index].is_some() {
                if let Err(e) = self.clear(CacheId(index as u16)) {
                    log::error!("teardown of cache {}: {}", index, e);
                }
            }
        }
    }
}
