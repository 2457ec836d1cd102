// this_file: src/family.rs

//! The family table.
//!
//! A family is the shared context of many cache nodes (one font + size +
//! render-flags combination, say). Nodes reference their family by a small
//! stable integer into this table rather than by pointer, so family
//! objects can move freely and an out-of-range index can be caught cheaply
//! before it is trusted.
//!
//! Free slots are threaded through an explicit free list and recycled on
//! allocation.

use crate::error::{Error, Result};
use std::any::Any;

/// Sentinel-free slot state: either recycled or live.
enum Slot {
    Free { next_free: Option<u32> },
    Live(FamilyEntry),
}

/// One live family.
pub struct FamilyEntry {
    /// Registry index of the cache this family belongs to.
    pub cache_id: u16,
    /// Number of live nodes referencing this family. The family is freed
    /// when this drops back to zero.
    pub node_count: u32,
    /// Type-specific family data, owned by the typed cache that built it.
    pub payload: Box<dyn Any>,
}

/// Growable free-list-backed array of families.
pub struct FamilyTable {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    live: u32,
}

impl FamilyTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            live: 0,
        }
    }

    /// Number of live families.
    pub fn live_count(&self) -> u32 {
        self.live
    }

    /// Total slot count (live + recycled).
    pub fn slot_count(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Allocate a slot for a new family and return its stable index.
    pub fn alloc(&mut self, cache_id: u16, payload: Box<dyn Any>) -> u32 {
        let entry = FamilyEntry {
            cache_id,
            node_count: 0,
            payload,
        };
        self.live += 1;

        match self.free_head {
            Some(index) => {
                match self.slots[index as usize] {
                    Slot::Free { next_free } => self.free_head = next_free,
                    Slot::Live(_) => {
                        // free list never points at a live slot; repair and
                        // fall through to a fresh push
                        log::error!("family table: free list points at live slot {}", index);
                        self.free_head = None;
                        self.slots.push(Slot::Live(entry));
                        return (self.slots.len() - 1) as u32;
                    }
                }
                self.slots[index as usize] = Slot::Live(entry);
                index
            }
            None => {
                self.slots.push(Slot::Live(entry));
                (self.slots.len() - 1) as u32
            }
        }
    }

    /// Return a slot to the free list.
    pub fn free(&mut self, index: u32) -> Result<()> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(Error::CorruptedCache("family index out of range"))?;
        match slot {
            Slot::Free { .. } => {
                log::error!("family table: double free of slot {}", index);
                Err(Error::CorruptedCache("family slot already free"))
            }
            Slot::Live(_) => {
                *slot = Slot::Free {
                    next_free: self.free_head,
                };
                self.free_head = Some(index);
                self.live -= 1;
                Ok(())
            }
        }
    }

    /// Borrow a live family entry, validating the index first.
    pub fn entry(&self, index: u32) -> Result<&FamilyEntry> {
        match self.slots.get(index as usize) {
            Some(Slot::Live(entry)) => Ok(entry),
            Some(Slot::Free { .. }) => Err(Error::CorruptedCache("family slot is free")),
            None => Err(Error::CorruptedCache("family index out of range")),
        }
    }

    /// Mutably borrow a live family entry.
    pub fn entry_mut(&mut self, index: u32) -> Result<&mut FamilyEntry> {
        match self.slots.get_mut(index as usize) {
            Some(Slot::Live(entry)) => Ok(entry),
            Some(Slot::Free { .. }) => Err(Error::CorruptedCache("family slot is free")),
            None => Err(Error::CorruptedCache("family index out of range")),
        }
    }

    /// Borrow only the type-erased payload of a live family.
    pub fn payload(&self, index: u32) -> Result<&dyn Any> {
        Ok(self.entry(index)?.payload.as_ref())
    }
}

impl Default for FamilyTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FamilyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FamilyTable")
            .field("slots", &self.slots.len())
            .field("live", &self.live)
            .finish()
    }
}
