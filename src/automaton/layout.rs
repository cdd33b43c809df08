//! Binary layout of a region: header, state records and transition records.
//!
//! ```text
//! +----------------------+  offset 0
//! | Header               |  HEADER_SIZE bytes
//! +----------------------+  state_table_offset
//! | State record         |  magic, id, transition_count
//! |   Transition record  |  magic, label, target   (x transition_count)
//! | State record         |
//! |   ...                |
//! +----------------------+  state_table_offset + state_table_size
//! | zero fill            |
//! +----------------------+  total_size
//! ```
//!
//! Every field is a 64-bit word in native byte order. A region written on one
//! architecture is only readable on a machine with the same word layout; moving
//! blobs between architectures is not supported.

use crate::error::RegionFault;
use byteorder::{ByteOrder, NativeEndian};
use serde::Serialize;

/// Numeric id of an abstract program state.
pub type StateId = u64;

/// Identifier of an intercepted library or system call.
pub type CallLabel = u64;

/// Magic word at the start of every region.
pub const HEADER_MAGIC: u64 = 0xDEAD_BEEF;

/// Magic word at the start of every state record.
pub const STATE_MAGIC: u64 = 0xCAFE_BABE;

/// Magic word at the start of every transition record.
pub const TRANSITION_MAGIC: u64 = 0xBAAD_F00D;

/// Current region format version.
pub const FORMAT_VERSION: u64 = 1;

/// Default region size: 1 MiB.
pub const DEFAULT_CAPACITY: usize = 1024 * 1024;

const WORD: usize = 8;

const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 8;
const OFF_CHECKSUM: usize = 16;
const OFF_TOTAL_SIZE: usize = 24;
const OFF_FINALIZED: usize = 32;
// 31 reserved bytes follow the finalized flag.
const OFF_NUM_STATES: usize = 64;
const OFF_TABLE_OFFSET: usize = 72;
const OFF_TABLE_SIZE: usize = 80;

/// Fixed size of the header in bytes.
pub const HEADER_SIZE: usize = 88;

/// Size of one state record in bytes.
pub const STATE_RECORD_SIZE: usize = 3 * WORD;

/// Size of one transition record in bytes.
pub const TRANSITION_RECORD_SIZE: usize = 3 * WORD;

/// Region header, stored at offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// Must equal [`HEADER_MAGIC`].
    pub magic: u64,
    /// Must equal [`FORMAT_VERSION`].
    pub version: u64,
    /// Reserved. Never computed and never checked.
    pub checksum: u64,
    /// Size of the whole region in bytes.
    pub total_size: u64,
    /// Set once construction is complete.
    pub finalized: bool,
    /// Number of state records in the table.
    pub num_states: u64,
    /// Offset of the first state record.
    pub state_table_offset: u64,
    /// Bytes occupied by state and transition records.
    pub state_table_size: u64,
}

impl Header {
    /// Header defaults for a freshly created region.
    pub fn new(total_size: usize) -> Self {
        Self {
            magic: HEADER_MAGIC,
            version: FORMAT_VERSION,
            checksum: 0,
            total_size: total_size as u64,
            finalized: false,
            num_states: 0,
            state_table_offset: HEADER_SIZE as u64,
            state_table_size: 0,
        }
    }

    /// Decode the header at the start of `region`.
    pub fn read(region: &[u8]) -> Result<Self, RegionFault> {
        if region.len() < HEADER_SIZE {
            return Err(RegionFault::Absent);
        }

        Ok(Self {
            magic: word(region, OFF_MAGIC),
            version: word(region, OFF_VERSION),
            checksum: word(region, OFF_CHECKSUM),
            total_size: word(region, OFF_TOTAL_SIZE),
            finalized: region[OFF_FINALIZED] != 0,
            num_states: word(region, OFF_NUM_STATES),
            state_table_offset: word(region, OFF_TABLE_OFFSET),
            state_table_size: word(region, OFF_TABLE_SIZE),
        })
    }

    /// Encode into the first [`HEADER_SIZE`] bytes of `region`.
    ///
    /// Reserved bytes are left untouched.
    pub fn write(&self, region: &mut [u8]) {
        put_word(region, OFF_MAGIC, self.magic);
        put_word(region, OFF_VERSION, self.version);
        put_word(region, OFF_CHECKSUM, self.checksum);
        put_word(region, OFF_TOTAL_SIZE, self.total_size);
        region[OFF_FINALIZED] = u8::from(self.finalized);
        put_word(region, OFF_NUM_STATES, self.num_states);
        put_word(region, OFF_TABLE_OFFSET, self.state_table_offset);
        put_word(region, OFF_TABLE_SIZE, self.state_table_size);
    }
}

/// An abstract program state, as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateRecord {
    /// Must equal [`STATE_MAGIC`].
    pub magic: u64,
    /// State id.
    pub id: StateId,
    /// Number of transition records that follow.
    pub transition_count: u64,
}

impl StateRecord {
    /// A well-formed record.
    pub fn new(id: StateId, transition_count: u64) -> Self {
        Self {
            magic: STATE_MAGIC,
            id,
            transition_count,
        }
    }

    /// Decode the record at `offset`, bounds-checked against the region.
    pub fn read(region: &[u8], offset: usize) -> Result<Self, RegionFault> {
        let bytes = record(region, offset, STATE_RECORD_SIZE)?;
        Ok(Self {
            magic: word(bytes, 0),
            id: word(bytes, WORD),
            transition_count: word(bytes, 2 * WORD),
        })
    }

    /// Encode into `out`, which must hold [`STATE_RECORD_SIZE`] bytes.
    pub fn write(&self, out: &mut [u8]) {
        put_word(out, 0, self.magic);
        put_word(out, WORD, self.id);
        put_word(out, 2 * WORD, self.transition_count);
    }
}

/// A labelled edge, as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRecord {
    /// Must equal [`TRANSITION_MAGIC`].
    pub magic: u64,
    /// Call label that enables this edge.
    pub label: CallLabel,
    /// State reached when the edge is taken.
    pub target: StateId,
}

impl TransitionRecord {
    /// A well-formed record.
    pub fn new(label: CallLabel, target: StateId) -> Self {
        Self {
            magic: TRANSITION_MAGIC,
            label,
            target,
        }
    }

    /// Decode the record at `offset`, bounds-checked against the region.
    pub fn read(region: &[u8], offset: usize) -> Result<Self, RegionFault> {
        let bytes = record(region, offset, TRANSITION_RECORD_SIZE)?;
        Ok(Self {
            magic: word(bytes, 0),
            label: word(bytes, WORD),
            target: word(bytes, 2 * WORD),
        })
    }

    /// Encode into `out`, which must hold [`TRANSITION_RECORD_SIZE`] bytes.
    pub fn write(&self, out: &mut [u8]) {
        put_word(out, 0, self.magic);
        put_word(out, WORD, self.label);
        put_word(out, 2 * WORD, self.target);
    }
}

/// Bytes needed for a state with `transitions` outgoing edges.
pub fn state_footprint(transitions: usize) -> Option<usize> {
    transitions
        .checked_mul(TRANSITION_RECORD_SIZE)?
        .checked_add(STATE_RECORD_SIZE)
}

fn record(region: &[u8], offset: usize, len: usize) -> Result<&[u8], RegionFault> {
    offset
        .checked_add(len)
        .and_then(|end| region.get(offset..end))
        .ok_or(RegionFault::OutOfBounds {
            offset: offset as u64,
        })
}

fn word(bytes: &[u8], offset: usize) -> u64 {
    NativeEndian::read_u64(&bytes[offset..offset + WORD])
}

fn put_word(bytes: &mut [u8], offset: usize, value: u64) {
    NativeEndian::write_u64(&mut bytes[offset..offset + WORD], value);
}
