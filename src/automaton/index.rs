//! In-memory id to offset lookup, rebuilt from the region and never stored

use super::env::Environment;
use super::layout::StateId;
use crate::error::{GuardError, Result, StateFault};
use std::num::NonZeroUsize;

/// Default growth step, in slots.
pub const DEFAULT_INDEX_CHUNK: usize = 4 * 1024;

/// One index entry. Records never start at offset 0 (the header is there),
/// so the offset fits a non-zero niche and a slot stays one word wide.
pub type Slot = Option<NonZeroUsize>;

/// Maps a state id to the offset of its state record.
#[derive(Debug, Clone)]
pub struct StateIndex {
    slots: Vec<Slot>,
    chunk: usize,
}

impl StateIndex {
    /// Empty index that grows `chunk` slots at a time
    pub fn new(chunk: usize) -> Self {
        Self {
            slots: Vec::new(),
            chunk: chunk.max(1),
        }
    }

    /// Offset of the record for `id`
    pub fn get(&self, id: StateId) -> Option<usize> {
        let slot = usize::try_from(id).ok()?;
        self.slots.get(slot).copied().flatten().map(NonZeroUsize::get)
    }

    /// Whether `id` has a record
    pub fn contains(&self, id: StateId) -> bool {
        self.get(id).is_some()
    }

    /// Number of slots currently allocated
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Ids with a record, ascending
    pub fn ids(&self) -> impl Iterator<Item = StateId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(id, _)| id as StateId)
    }

    /// Make sure a slot exists for `id`, growing in whole chunks.
    pub(crate) fn ensure(&mut self, id: StateId, env: &dyn Environment) -> Result<()> {
        let slot = usize::try_from(id)
            .map_err(|_| GuardError::InvalidState(StateFault::OutOfRange(id)))?;
        if slot < self.slots.len() {
            return Ok(());
        }

        let wanted = (slot / self.chunk)
            .checked_add(1)
            .and_then(|chunks| chunks.checked_mul(self.chunk))
            .ok_or(GuardError::InvalidState(StateFault::OutOfRange(id)))?;
        let additional = wanted - self.slots.len();
        env.reserve_slots(&mut self.slots, additional)?;
        self.slots.resize(wanted, None);
        Ok(())
    }

    /// Record `offset` for `id`. The slot must already exist.
    pub(crate) fn set(&mut self, id: StateId, offset: usize) {
        if let Some(slot) = usize::try_from(id).ok().and_then(|s| self.slots.get_mut(s)) {
            *slot = NonZeroUsize::new(offset);
        }
    }

    /// Drop every entry and pre-size for `expected` states.
    pub(crate) fn rebuild(&mut self, expected: usize, env: &dyn Environment) -> Result<()> {
        self.slots.clear();
        env.reserve_slots(&mut self.slots, expected)
    }
}

impl Default for StateIndex {
    fn default() -> Self {
        Self::new(DEFAULT_INDEX_CHUNK)
    }
}
