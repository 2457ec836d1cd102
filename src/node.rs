// this_file: src/node.rs

//! Node storage and the global MRU list.
//!
//! Every live node of every registered cache lives in one arena, addressed
//! by a `u32` index. Bucket chains and the global most-recently-used list
//! are threaded through these indices instead of pointers, and each slot
//! carries a generation counter so a stale [`NodeRef`] is detected instead
//! of aliasing a recycled slot.
//!
//! The MRU list is circular and doubly linked: while a node is linked its
//! neighbors are always valid, and the tail (`head.prev`) is the eviction
//! candidate the compression pass starts from.

use crate::error::{Error, Result};
use std::any::Any;

/// Stable, generation-checked handle to a cache node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// One live node: framework header plus the typed payload.
pub(crate) struct NodeBody {
    /// Registry index of the owning cache; lets the manager map a node
    /// back to its cache without a pointer.
    pub cache_id: u16,
    /// Index of the node's family in the family table.
    pub family_slot: u32,
    /// Hash of the query that created this node, reused for bucket
    /// placement and for rehashing on resize.
    pub hash: u32,
    /// Pin count; a node with `ref_count > 0` is never evicted.
    pub ref_count: i32,
    /// Next node in the same hash bucket.
    pub bucket_next: Option<u32>,
    pub mru_prev: u32,
    pub mru_next: u32,
    /// Type-specific payload, owned by the typed cache that built it.
    pub payload: Box<dyn Any>,
}

struct ArenaSlot {
    generation: u32,
    body: Option<NodeBody>,
}

/// Arena of all live nodes plus the global MRU list state.
pub(crate) struct NodeArena {
    slots: Vec<ArenaSlot>,
    free: Vec<u32>,
    mru_head: Option<u32>,
    live: u32,
}

impl NodeArena {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            mru_head: None,
            live: 0,
        }
    }

    /// Number of live (MRU-linked) nodes.
    pub fn live_count(&self) -> u32 {
        self.live
    }

    /// Head of the MRU list (most recently used node), if any.
    pub fn mru_head(&self) -> Option<u32> {
        self.mru_head
    }

    /// Borrow a live node body.
    pub fn body(&self, index: u32) -> Result<&NodeBody> {
        self.slots
            .get(index as usize)
            .and_then(|s| s.body.as_ref())
            .ok_or(Error::CorruptedCache("node index does not name a live node"))
    }

    /// Mutably borrow a live node body.
    pub fn body_mut(&mut self, index: u32) -> Result<&mut NodeBody> {
        self.slots
            .get_mut(index as usize)
            .and_then(|s| s.body.as_mut())
            .ok_or(Error::CorruptedCache("node index does not name a live node"))
    }

    /// Handle for a live node.
    pub fn handle(&self, index: u32) -> Result<NodeRef> {
        let slot = self
            .slots
            .get(index as usize)
            .filter(|s| s.body.is_some())
            .ok_or(Error::CorruptedCache("node index does not name a live node"))?;
        Ok(NodeRef {
            index,
            generation: slot.generation,
        })
    }

    /// Resolve a handle back to its index, rejecting stale generations.
    pub fn resolve(&self, node: NodeRef) -> Result<u32> {
        match self.slots.get(node.index as usize) {
            Some(slot) if slot.body.is_some() && slot.generation == node.generation => {
                Ok(node.index)
            }
            _ => Err(Error::InvalidArgument(
                "stale or invalid node reference".into(),
            )),
        }
    }

    /// Store a new node body and link it at the head of the MRU list.
    pub fn insert(&mut self, mut body: NodeBody) -> Result<u32> {
        body.bucket_next = None;
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].body = Some(body);
                index
            }
            None => {
                self.slots.push(ArenaSlot {
                    generation: 0,
                    body: Some(body),
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.mru_link(index)?;
        Ok(index)
    }

    /// Unlink a node from the MRU list, take its body out of the arena,
    /// and retire the slot (bumping its generation).
    pub fn remove(&mut self, index: u32) -> Result<NodeBody> {
        self.mru_unlink(index)?;
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(Error::CorruptedCache("node index out of range"))?;
        let body = slot
            .body
            .take()
            .ok_or(Error::CorruptedCache("removing a dead node"))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        Ok(body)
    }

    /// Link a node at the head of the circular MRU list.
    fn mru_link(&mut self, index: u32) -> Result<()> {
        match self.mru_head {
            Some(first) => {
                let last = self.body(first)?.mru_prev;
                {
                    let body = self.body_mut(index)?;
                    body.mru_prev = last;
                    body.mru_next = first;
                }
                self.body_mut(last)?.mru_next = index;
                self.body_mut(first)?.mru_prev = index;
            }
            None => {
                let body = self.body_mut(index)?;
                body.mru_prev = index;
                body.mru_next = index;
            }
        }
        self.mru_head = Some(index);
        self.live += 1;
        Ok(())
    }

    /// Remove a node from the MRU list, keeping the list circular.
    fn mru_unlink(&mut self, index: u32) -> Result<()> {
        let (prev, next) = {
            let body = self.body(index)?;
            (body.mru_prev, body.mru_next)
        };
        let first = self
            .mru_head
            .ok_or(Error::CorruptedCache("MRU unlink on empty list"))?;

        self.body_mut(prev)?.mru_next = next;
        self.body_mut(next)?.mru_prev = prev;

        if next == first {
            if index == first {
                // last node in the list
                self.mru_head = None;
            } else {
                self.body_mut(first)?.mru_prev = prev;
            }
        }
        if index == first && self.mru_head.is_some() {
            self.mru_head = Some(next);
        }

        let body = self.body_mut(index)?;
        body.mru_prev = index;
        body.mru_next = index;
        self.live -= 1;
        Ok(())
    }

    /// Move an already-linked node to the head of the MRU list.
    pub fn mru_up(&mut self, index: u32) -> Result<()> {
        if self.mru_head == Some(index) {
            return Ok(());
        }
        self.mru_unlink(index)?;
        self.mru_link(index)
    }

    /// Walk the MRU list from the head, most recent first.
    pub fn mru_iter(&self) -> MruIter<'_> {
        MruIter {
            arena: self,
            next: self.mru_head,
            head: self.mru_head,
            started: false,
        }
    }
}

pub(crate) struct MruIter<'a> {
    arena: &'a NodeArena,
    next: Option<u32>,
    head: Option<u32>,
    started: bool,
}

impl Iterator for MruIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let current = self.next?;
        if self.started && Some(current) == self.head {
            return None;
        }
        self.started = true;
        self.next = self.arena.body(current).ok().map(|b| b.mru_next);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(cache_id: u16) -> NodeBody {
        NodeBody {
            cache_id,
            family_slot: 0,
            hash: 0,
            ref_count: 0,
            bucket_next: None,
            mru_prev: 0,
            mru_next: 0,
            payload: Box::new(()),
        }
    }

    fn mru_order(arena: &NodeArena) -> Vec<u32> {
        arena.mru_iter().collect()
    }

    #[test]
    fn mru_links_newest_first() {
        let mut arena = NodeArena::new();
        let a = arena.insert(body(0)).unwrap();
        let b = arena.insert(body(0)).unwrap();
        let c = arena.insert(body(0)).unwrap();
        assert_eq!(mru_order(&arena), vec![c, b, a]);
        assert_eq!(arena.live_count(), 3);

        // tail is head.prev
        let head = arena.mru_head().unwrap();
        assert_eq!(arena.body(head).unwrap().mru_prev, a);
    }

    #[test]
    fn mru_up_moves_node_to_head() {
        let mut arena = NodeArena::new();
        let a = arena.insert(body(0)).unwrap();
        let b = arena.insert(body(0)).unwrap();
        let c = arena.insert(body(0)).unwrap();

        arena.mru_up(a).unwrap();
        assert_eq!(mru_order(&arena), vec![a, c, b]);

        // promoting the head is a no-op
        arena.mru_up(a).unwrap();
        assert_eq!(mru_order(&arena), vec![a, c, b]);
    }

    #[test]
    fn remove_keeps_list_circular() {
        let mut arena = NodeArena::new();
        let a = arena.insert(body(0)).unwrap();
        let b = arena.insert(body(0)).unwrap();
        let c = arena.insert(body(0)).unwrap();

        arena.remove(b).unwrap();
        assert_eq!(mru_order(&arena), vec![c, a]);
        assert_eq!(arena.body(c).unwrap().mru_prev, a);
        assert_eq!(arena.body(a).unwrap().mru_next, c);

        arena.remove(c).unwrap();
        arena.remove(a).unwrap();
        assert!(arena.mru_head().is_none());
        assert_eq!(arena.live_count(), 0);
    }

    #[test]
    fn stale_handles_are_rejected() {
        let mut arena = NodeArena::new();
        let a = arena.insert(body(0)).unwrap();
        let handle = arena.handle(a).unwrap();
        arena.remove(a).unwrap();

        assert!(arena.resolve(handle).is_err());

        // slot reuse bumps the generation, so the old handle stays dead
        let b = arena.insert(body(0)).unwrap();
        assert_eq!(b, a);
        assert!(arena.resolve(handle).is_err());
        assert!(arena.resolve(arena.handle(b).unwrap()).is_ok());
    }
}
