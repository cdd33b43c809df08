//! Execution environment capability
//!
//! The automaton runs both in ordinary processes and in privileged,
//! allocation-constrained contexts. Everything that differs between the two
//! (how memory is obtained, how unrecoverable faults are reported) goes through
//! an [`Environment`] chosen when the instance is created.

use super::index::Slot;
use crate::error::{GuardError, Result};
use std::fmt;
use std::mem;
use tracing::error;

/// Allocation and fault-reporting primitives for one execution context
pub trait Environment: fmt::Debug + Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    /// Allocate `len` zeroed bytes
    fn allocate_zeroed(&self, len: usize) -> Result<Vec<u8>>;

    /// Reserve room for `additional` more index slots
    fn reserve_slots(&self, slots: &mut Vec<Slot>, additional: usize) -> Result<()>;

    /// Report a fault that makes the instance unusable
    fn report_fatal(&self, context: &str, err: &GuardError);
}

/// Ordinary unprivileged process
#[derive(Debug, Clone, Copy, Default)]
pub struct HostEnv;

impl Environment for HostEnv {
    fn name(&self) -> &'static str {
        "host"
    }

    fn allocate_zeroed(&self, len: usize) -> Result<Vec<u8>> {
        zeroed(len, self.name())
    }

    fn reserve_slots(&self, slots: &mut Vec<Slot>, additional: usize) -> Result<()> {
        slots
            .try_reserve_exact(additional)
            .map_err(|_| GuardError::AllocationFailed {
                requested: additional.saturating_mul(SLOT_SIZE),
                environment: self.name(),
            })
    }

    fn report_fatal(&self, context: &str, err: &GuardError) {
        error!("{}: {}", context, err);
    }
}

/// Context with a hard ceiling on any single allocation
#[derive(Debug, Clone, Copy)]
pub struct BoundedEnv {
    limit: usize,
}

impl BoundedEnv {
    /// Refuse allocations larger than `limit` bytes
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    /// Allocation ceiling in bytes
    pub fn limit(&self) -> usize {
        self.limit
    }

    fn check(&self, requested: usize) -> Result<()> {
        if requested > self.limit {
            return Err(GuardError::AllocationFailed {
                requested,
                environment: self.name(),
            });
        }
        Ok(())
    }
}

impl Environment for BoundedEnv {
    fn name(&self) -> &'static str {
        "bounded"
    }

    fn allocate_zeroed(&self, len: usize) -> Result<Vec<u8>> {
        self.check(len)?;
        zeroed(len, self.name())
    }

    fn reserve_slots(&self, slots: &mut Vec<Slot>, additional: usize) -> Result<()> {
        let total = slots
            .len()
            .saturating_add(additional)
            .saturating_mul(SLOT_SIZE);
        self.check(total)?;
        slots
            .try_reserve_exact(additional)
            .map_err(|_| GuardError::AllocationFailed {
                requested: total,
                environment: self.name(),
            })
    }

    fn report_fatal(&self, context: &str, err: &GuardError) {
        error!(limit = self.limit, "{}: {}", context, err);
    }
}

const SLOT_SIZE: usize = mem::size_of::<Slot>();

fn zeroed(len: usize, environment: &'static str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| GuardError::AllocationFailed {
            requested: len,
            environment,
        })?;
    buf.resize(len, 0);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_allocates_zeroed() {
        let buf = HostEnv.allocate_zeroed(64).unwrap();
        assert_eq!(buf.len(), 64);
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_bounded_refuses_large_allocation() {
        let env = BoundedEnv::new(128);
        assert!(env.allocate_zeroed(128).is_ok());

        match env.allocate_zeroed(129) {
            Err(GuardError::AllocationFailed {
                requested,
                environment,
            }) => {
                assert_eq!(requested, 129);
                assert_eq!(environment, "bounded");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_bounded_limits_index_growth() {
        let env = BoundedEnv::new(4 * SLOT_SIZE);
        let mut slots = Vec::new();
        assert!(env.reserve_slots(&mut slots, 4).is_ok());
        slots.resize(4, None);
        assert!(env.reserve_slots(&mut slots, 1).is_err());
    }
}
