//! Whole-region snapshot and restore
//!
//! A stored automaton is the region verbatim: header, records and the unused
//! zero tail. Nothing is compacted, so a blob is always exactly the configured
//! capacity.

use super::arena::Arena;
use super::env::Environment;
use super::index::StateIndex;
use super::runtime::Automaton;
use crate::config::ArenaConfig;
use crate::error::{GuardError, RegionFault, Result};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Write `header.total_size` bytes of the region to `writer`.
pub fn store<W: Write>(arena: &Arena, mut writer: W) -> Result<()> {
    let header = arena.header()?;
    let total = usize::try_from(header.total_size)
        .ok()
        .filter(|total| *total == arena.capacity())
        .ok_or(RegionFault::SizeMismatch {
            declared: header.total_size,
            capacity: arena.capacity(),
        })?;

    writer.write_all(&arena.as_bytes()[..total])?;
    writer.flush()?;
    debug!("Stored {} byte region", total);
    Ok(())
}

/// Read exactly `config.capacity` bytes and verify them.
///
/// Short streams and streams with trailing data are both rejected; there is
/// no partial recovery. A region that fails verification is never returned.
pub fn load<R: Read>(reader: R, config: &ArenaConfig, env: Arc<dyn Environment>) -> Result<Automaton> {
    config.validate()?;
    let arena = match read_region(reader, config.capacity, Arc::clone(&env)) {
        Ok(arena) => arena,
        Err(e) => {
            env.report_fatal("failed to read region", &e);
            return Err(e);
        }
    };
    debug!("Loaded {} byte region, verifying it", config.capacity);

    Automaton::from_arena(arena, StateIndex::new(config.index_chunk), config.clone())
}

/// Store an automaton to `path`, replacing any existing file.
pub fn store_file(automaton: &Automaton, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    automaton.store(BufWriter::new(file))?;
    debug!("Automaton stored to {}", path.display());
    Ok(())
}

/// Load and verify an automaton stored at `path`.
pub fn load_file(path: &Path, config: &ArenaConfig, env: Arc<dyn Environment>) -> Result<Automaton> {
    let file = File::open(path)?;
    load(BufReader::new(file), config, env)
}

fn read_region<R: Read>(mut reader: R, capacity: usize, env: Arc<dyn Environment>) -> Result<Arena> {
    let mut buf = env.allocate_zeroed(capacity)?;

    let filled = fill(&mut reader, &mut buf)?;
    if filled < capacity {
        return Err(GuardError::InvalidRegion(RegionFault::Truncated {
            expected: capacity,
            actual: filled,
        }));
    }

    let mut extra = [0u8; 1];
    if fill(&mut reader, &mut extra)? != 0 {
        return Err(GuardError::InvalidRegion(RegionFault::Oversized { capacity }));
    }

    Ok(Arena::from_raw(buf, env))
}

fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::builder::AutomatonBuilder;
    use crate::automaton::env::HostEnv;
    use crate::error::StateFault;
    use std::io::Cursor;

    const CAPACITY: usize = 2048;

    fn config() -> ArenaConfig {
        ArenaConfig::default().with_capacity(CAPACITY)
    }

    fn sample() -> Automaton {
        let mut builder = AutomatonBuilder::new(&config(), Arc::new(HostEnv)).unwrap();
        builder.add_state(0, &[(1, 1)]).unwrap();
        builder.add_state(1, &[(2, 0), (3, 1)]).unwrap();
        builder.finalize().unwrap()
    }

    #[test]
    fn test_store_emits_whole_region() {
        let automaton = sample();
        let mut out = Vec::new();
        automaton.store(&mut out).unwrap();
        assert_eq!(out.len(), CAPACITY);
        assert_eq!(out, automaton.as_bytes());
    }

    #[test]
    fn test_roundtrip_is_byte_identical() {
        let automaton = sample();
        let mut out = Vec::new();
        automaton.store(&mut out).unwrap();

        let mut restored = load(Cursor::new(&out), &config(), Arc::new(HostEnv)).unwrap();
        assert_eq!(restored.as_bytes(), automaton.as_bytes());
        assert_eq!(restored.verify().unwrap(), *automaton.layout());
        assert_eq!(restored.reset().unwrap(), 0);
        assert_eq!(restored.commit(1).unwrap(), 1);
    }

    #[test]
    fn test_short_stream() {
        let automaton = sample();
        let mut out = Vec::new();
        automaton.store(&mut out).unwrap();
        out.truncate(CAPACITY - 1);

        match load(Cursor::new(&out), &config(), Arc::new(HostEnv)) {
            Err(GuardError::InvalidRegion(RegionFault::Truncated { expected, actual })) => {
                assert_eq!(expected, CAPACITY);
                assert_eq!(actual, CAPACITY - 1);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_long_stream() {
        let automaton = sample();
        let mut out = Vec::new();
        automaton.store(&mut out).unwrap();
        out.push(0);

        assert!(matches!(
            load(Cursor::new(&out), &config(), Arc::new(HostEnv)),
            Err(GuardError::InvalidRegion(RegionFault::Oversized { .. }))
        ));
    }

    #[test]
    fn test_unfinalized_blob_is_rejected() {
        let builder = AutomatonBuilder::new(&config(), Arc::new(HostEnv)).unwrap();
        let blob = builder.as_bytes().to_vec();

        assert!(matches!(
            load(Cursor::new(&blob), &config(), Arc::new(HostEnv)),
            Err(GuardError::InvalidState(StateFault::NotFinalized))
        ));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.bin");
        let automaton = sample();

        store_file(&automaton, &path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), CAPACITY as u64);

        let restored = load_file(&path, &config(), Arc::new(HostEnv)).unwrap();
        assert_eq!(restored.as_bytes(), automaton.as_bytes());
    }
}
