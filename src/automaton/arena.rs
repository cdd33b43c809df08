//! Fixed-capacity byte region with an append-only write cursor

use super::env::Environment;
use super::layout::{Header, HEADER_SIZE};
use crate::error::{GuardError, Result};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Flat region backing one automaton.
///
/// All structure inside the region is addressed by offset. The write cursor
/// only ever moves forward.
pub struct Arena {
    buf: Vec<u8>,
    cursor: usize,
    env: Arc<dyn Environment>,
}

impl Arena {
    /// Create a zeroed region of `capacity` bytes with a default header.
    pub fn create(capacity: usize, env: Arc<dyn Environment>) -> Result<Self> {
        if capacity < HEADER_SIZE {
            return Err(GuardError::CapacityExceeded {
                requested: HEADER_SIZE,
                available: capacity,
            });
        }

        let mut buf = env.allocate_zeroed(capacity)?;
        Header::new(capacity).write(&mut buf);
        debug!(
            "Created {} byte arena in {} environment",
            capacity,
            env.name()
        );

        Ok(Self {
            buf,
            cursor: HEADER_SIZE,
            env,
        })
    }

    /// Wrap bytes obtained elsewhere. The cursor stays at the header until
    /// verification establishes where the state table ends.
    pub(crate) fn from_raw(buf: Vec<u8>, env: Arc<dyn Environment>) -> Self {
        Self {
            buf,
            cursor: HEADER_SIZE,
            env,
        }
    }

    /// Hand out the next `n` bytes for writing.
    pub fn reserve(&mut self, n: usize) -> Result<&mut [u8]> {
        let available = self.remaining();
        if n > available {
            return Err(GuardError::CapacityExceeded {
                requested: n,
                available,
            });
        }

        let start = self.cursor;
        self.cursor += n;
        Ok(&mut self.buf[start..self.cursor])
    }

    /// Total size of the region
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Offset of the next free byte
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Bytes still available to `reserve`
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.cursor)
    }

    /// The whole region, including the unused tail
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Environment this region was allocated in
    pub fn env(&self) -> &Arc<dyn Environment> {
        &self.env
    }

    /// Decode the current header
    pub fn header(&self) -> Result<Header> {
        Ok(Header::read(&self.buf)?)
    }

    pub(crate) fn update_header<F>(&mut self, update: F) -> Result<Header>
    where
        F: FnOnce(&mut Header),
    {
        let mut header = self.header()?;
        update(&mut header);
        header.write(&mut self.buf);
        Ok(header)
    }

    pub(crate) fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor.min(self.buf.len());
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.buf.len())
            .field("cursor", &self.cursor)
            .field("env", &self.env.name())
            .finish()
    }
}
