//! Structural verification of a region and reconstruction of its index

use super::env::Environment;
use super::index::StateIndex;
use super::layout::{
    Header, StateRecord, TransitionRecord, FORMAT_VERSION, HEADER_MAGIC, HEADER_SIZE,
    STATE_MAGIC, STATE_RECORD_SIZE, TRANSITION_MAGIC, TRANSITION_RECORD_SIZE,
};
use crate::config::ArenaConfig;
use crate::error::{GuardError, RegionFault, Result, StateFault};
use serde::Serialize;
use tracing::{debug, warn};

/// What a successful verification walked over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedLayout {
    /// Number of state records
    pub states: u64,
    /// Number of transition records
    pub transitions: u64,
    /// Offset just past the last record
    pub end: usize,
}

/// Verify `region` and rebuild `index` from it.
///
/// Checks, in order: the region holds a header, the region is finalized, the
/// header magic, version and size are right, then every state record and
/// every transition record carries its magic and lies inside the region.
/// The first failure aborts the walk. The checksum field is not consulted.
///
/// Calling this repeatedly on the same region only rebuilds the index.
pub fn verify(
    region: &[u8],
    index: &mut StateIndex,
    config: &ArenaConfig,
    env: &dyn Environment,
) -> Result<VerifiedLayout> {
    let result = walk(region, index, config, env);
    if let Err(ref e) = result {
        warn!("Region failed verification: {}", e);
    }
    result
}

fn walk(
    region: &[u8],
    index: &mut StateIndex,
    config: &ArenaConfig,
    env: &dyn Environment,
) -> Result<VerifiedLayout> {
    let header = Header::read(region)?;

    if !header.finalized {
        return Err(StateFault::NotFinalized.into());
    }
    if header.magic != HEADER_MAGIC {
        return Err(RegionFault::BadMagic(header.magic).into());
    }
    if header.version != FORMAT_VERSION {
        return Err(RegionFault::BadVersion(header.version).into());
    }
    if header.total_size != region.len() as u64 {
        return Err(RegionFault::SizeMismatch {
            declared: header.total_size,
            capacity: region.len(),
        }
        .into());
    }

    // A corrupt count must not drive a huge up-front allocation.
    let max_states = (region.len() - HEADER_SIZE) / STATE_RECORD_SIZE;
    let expected = usize::try_from(header.num_states)
        .unwrap_or(usize::MAX)
        .min(max_states);
    index.rebuild(expected, env)?;
    let id_limit = config.state_id_limit(region.len());

    let mut offset = usize::try_from(header.state_table_offset)
        .ok()
        .filter(|off| *off >= HEADER_SIZE)
        .ok_or(RegionFault::OutOfBounds {
            offset: header.state_table_offset,
        })?;
    let mut transitions = 0u64;

    for position in 0..header.num_states {
        let state = StateRecord::read(region, offset)?;
        if state.magic != STATE_MAGIC {
            return Err(GuardError::InvalidNode {
                position,
                offset: offset as u64,
            });
        }
        if state.id > id_limit {
            return Err(StateFault::OutOfRange(state.id).into());
        }
        if index.contains(state.id) {
            return Err(GuardError::DuplicateState(state.id));
        }
        index.ensure(state.id, env)?;
        index.set(state.id, offset);
        offset += STATE_RECORD_SIZE;

        for i in 0..state.transition_count {
            let transition = TransitionRecord::read(region, offset)?;
            if transition.magic != TRANSITION_MAGIC {
                return Err(GuardError::InvalidTransition {
                    state: state.id,
                    index: i,
                });
            }
            offset += TRANSITION_RECORD_SIZE;
        }
        transitions += state.transition_count;
    }

    debug!(
        "Verified {} states and {} transitions ({} bytes)",
        header.num_states, transitions, offset
    );

    Ok(VerifiedLayout {
        states: header.num_states,
        transitions,
        end: offset,
    })
}
