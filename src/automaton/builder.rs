//! Append-only construction of an automaton region

use super::arena::Arena;
use super::env::Environment;
use super::index::StateIndex;
use super::layout::{
    state_footprint, CallLabel, StateId, StateRecord, TransitionRecord, STATE_RECORD_SIZE,
    TRANSITION_RECORD_SIZE,
};
use super::runtime::Automaton;
use crate::config::ArenaConfig;
use crate::error::{GuardError, Result, StateFault};
use std::sync::Arc;
use tracing::{debug, info};

/// Writes state and transition records into a fresh region.
///
/// The builder is the single writer while a region is under construction.
/// [`AutomatonBuilder::finalize`] consumes it, so nothing can be appended to a
/// finalized region.
#[derive(Debug)]
pub struct AutomatonBuilder {
    arena: Arena,
    index: StateIndex,
    config: ArenaConfig,
    states: usize,
}

impl AutomatonBuilder {
    /// Create an empty region sized by `config`
    pub fn new(config: &ArenaConfig, env: Arc<dyn Environment>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            arena: Arena::create(config.capacity, env)?,
            index: StateIndex::new(config.index_chunk),
            config: config.clone(),
            states: 0,
        })
    }

    /// Append state `id` with its outgoing transitions, in order.
    ///
    /// Each entry is `(call_label, target_id)`. Repeated labels are kept as
    /// given; the first one wins when the automaton is walked. Returns the
    /// offset of the new state record.
    ///
    /// On `CapacityExceeded` nothing is written and the region is left exactly
    /// as it was.
    pub fn add_state(
        &mut self,
        id: StateId,
        transitions: &[(CallLabel, StateId)],
    ) -> Result<usize> {
        if id > self.config.state_id_limit(self.arena.capacity()) {
            return Err(StateFault::OutOfRange(id).into());
        }
        if self.index.contains(id) {
            return Err(GuardError::DuplicateState(id));
        }

        let footprint = state_footprint(transitions.len()).ok_or(GuardError::CapacityExceeded {
            requested: usize::MAX,
            available: self.arena.remaining(),
        })?;
        if footprint > self.arena.remaining() {
            return Err(GuardError::CapacityExceeded {
                requested: footprint,
                available: self.arena.remaining(),
            });
        }

        self.index.ensure(id, self.arena.env().as_ref())?;

        let offset = self.arena.cursor();
        let out = self.arena.reserve(footprint)?;
        StateRecord::new(id, transitions.len() as u64).write(&mut out[..STATE_RECORD_SIZE]);
        for (slot, (label, target)) in out[STATE_RECORD_SIZE..]
            .chunks_exact_mut(TRANSITION_RECORD_SIZE)
            .zip(transitions)
        {
            TransitionRecord::new(*label, *target).write(slot);
        }
        self.index.set(id, offset);
        self.states += 1;

        let cursor = self.arena.cursor() as u64;
        self.arena.update_header(|header| {
            header.num_states += 1;
            header.state_table_size = cursor - header.state_table_offset;
        })?;

        debug!(
            "Added state {} with {} transitions at offset {}",
            id,
            transitions.len(),
            offset
        );
        Ok(offset)
    }

    /// Number of states added so far
    pub fn len(&self) -> usize {
        self.states
    }

    /// Whether no state has been added
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes still free in the region
    pub fn remaining(&self) -> usize {
        self.arena.remaining()
    }

    /// The region as written so far
    pub fn as_bytes(&self) -> &[u8] {
        self.arena.as_bytes()
    }

    /// Mark the region finalized, verify it and hand it to the runtime.
    ///
    /// The header checksum is left at zero: no checksum is computed.
    pub fn finalize(mut self) -> Result<Automaton> {
        let header = self.arena.update_header(|header| header.finalized = true)?;
        info!(
            "Finalized automaton with {} states ({} bytes of {})",
            header.num_states,
            header.state_table_size,
            self.arena.capacity()
        );

        Automaton::from_arena(self.arena, self.index, self.config)
    }
}
