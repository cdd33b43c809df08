//! Verified automaton and its traversal cursor

use super::arena::Arena;
use super::env::Environment;
use super::index::StateIndex;
use super::layout::{
    CallLabel, Header, StateId, StateRecord, TransitionRecord, STATE_MAGIC, STATE_RECORD_SIZE,
    TRANSITION_MAGIC, TRANSITION_RECORD_SIZE,
};
use super::persist;
use super::verifier::{self, VerifiedLayout};
use crate::config::ArenaConfig;
use crate::error::{GuardError, RegionFault, Result, StateFault};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::{debug, info};

/// Initial state of every automaton.
pub const INITIAL_STATE: StateId = 0;

/// Current position of a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Current state id
    pub state: StateId,
    offset: usize,
}

/// One outgoing edge of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Call label that enables the edge
    pub label: CallLabel,
    /// State the edge leads to
    pub target: StateId,
}

/// A finalized, verified automaton plus the cursor of the subject it guards.
///
/// One instance serves one monitored subject. It is not internally
/// synchronized; the caller feeds it one call at a time.
#[derive(Debug)]
pub struct Automaton {
    arena: Arena,
    index: StateIndex,
    header: Header,
    layout: VerifiedLayout,
    config: ArenaConfig,
    cursor: Option<Cursor>,
}

impl Automaton {
    /// Verify `arena` and wrap it. Any failure is reported to the environment.
    pub(crate) fn from_arena(
        mut arena: Arena,
        mut index: StateIndex,
        config: ArenaConfig,
    ) -> Result<Self> {
        let env = Arc::clone(arena.env());
        let verified = verifier::verify(arena.as_bytes(), &mut index, &config, env.as_ref())
            .and_then(|layout| Ok((layout, arena.header()?)));

        let (layout, header) = match verified {
            Ok(parts) => parts,
            Err(e) => {
                env.report_fatal("automaton failed verification", &e);
                return Err(e);
            }
        };
        arena.set_cursor(layout.end);

        Ok(Self {
            arena,
            index,
            header,
            layout,
            config,
            cursor: None,
        })
    }

    /// Copy a caller-supplied region into a fresh one and verify it.
    ///
    /// This is how a blob crosses a privilege boundary: the bytes are copied,
    /// never borrowed. A buffer shorter than the configured capacity is copied
    /// into the start of a zeroed region; a longer one is rejected.
    pub fn from_bytes(bytes: &[u8], config: &ArenaConfig, env: Arc<dyn Environment>) -> Result<Self> {
        config.validate()?;
        if bytes.len() > config.capacity {
            let err = GuardError::InvalidRegion(RegionFault::Oversized {
                capacity: config.capacity,
            });
            env.report_fatal("rejected region buffer", &err);
            return Err(err);
        }

        let mut buf = env.allocate_zeroed(config.capacity)?;
        buf[..bytes.len()].copy_from_slice(bytes);
        info!("Initializing automaton from {} byte buffer", bytes.len());

        Self::from_arena(
            Arena::from_raw(buf, env),
            StateIndex::new(config.index_chunk),
            config.clone(),
        )
    }

    /// Read exactly `config.capacity` bytes from `reader` and verify them.
    pub fn load<R: Read>(reader: R, config: &ArenaConfig, env: Arc<dyn Environment>) -> Result<Self> {
        persist::load(reader, config, env)
    }

    /// Write the whole region to `writer`.
    pub fn store<W: Write>(&self, writer: W) -> Result<()> {
        persist::store(&self.arena, writer)
    }

    /// Re-run verification over the region, rebuilding the index.
    pub fn verify(&mut self) -> Result<VerifiedLayout> {
        let env = Arc::clone(self.arena.env());
        let layout = verifier::verify(
            self.arena.as_bytes(),
            &mut self.index,
            &self.config,
            env.as_ref(),
        )?;
        self.layout = layout;
        Ok(layout)
    }

    /// Put the cursor on the initial state.
    pub fn reset(&mut self) -> Result<StateId> {
        let offset = self.index.get(INITIAL_STATE).ok_or(StateFault::Missing(INITIAL_STATE))?;
        self.cursor = Some(Cursor {
            state: INITIAL_STATE,
            offset,
        });
        debug!("Automaton reset to state {}", INITIAL_STATE);
        Ok(INITIAL_STATE)
    }

    /// Target of the first transition labelled `label` from the current
    /// state, without moving.
    ///
    /// `None` means no such transition. It is also returned when the cursor
    /// is unset or the current record is damaged, so a failed lookup never
    /// reads as permission.
    pub fn probe(&self, label: CallLabel) -> Option<StateId> {
        let cursor = self.cursor?;
        self.scan(cursor, label).ok().flatten()
    }

    /// Take the transition labelled `label`, or report a policy violation.
    ///
    /// On a violation the cursor stays where it was.
    pub fn commit(&mut self, label: CallLabel) -> Result<StateId> {
        let cursor = self.cursor.ok_or(StateFault::NoCursor)?;
        if cursor.state >= self.header.num_states {
            return Err(StateFault::OutOfRange(cursor.state).into());
        }

        match self.scan(cursor, label)? {
            Some(target) => {
                let offset = self.index.get(target).ok_or(StateFault::Missing(target))?;
                self.cursor = Some(Cursor {
                    state: target,
                    offset,
                });
                debug!("Transition {} -[{}]-> {}", cursor.state, label, target);
                Ok(target)
            }
            None => {
                debug!("Rejected call {} from state {}", label, cursor.state);
                Err(GuardError::PolicyViolation {
                    state: cursor.state,
                    label,
                })
            }
        }
    }

    fn scan(&self, cursor: Cursor, label: CallLabel) -> Result<Option<StateId>> {
        for transition in self.edges(cursor.state, cursor.offset)? {
            let transition = transition?;
            if transition.label == label {
                return Ok(Some(transition.target));
            }
        }
        Ok(None)
    }

    fn edges(&self, id: StateId, offset: usize) -> Result<Transitions<'_>> {
        let state = StateRecord::read(self.arena.as_bytes(), offset)?;
        if state.magic != STATE_MAGIC || state.id != id {
            return Err(GuardError::InvalidNode {
                position: id,
                offset: offset as u64,
            });
        }
        Ok(Transitions {
            region: self.arena.as_bytes(),
            state: id,
            offset: offset + STATE_RECORD_SIZE,
            next: 0,
            count: state.transition_count,
        })
    }

    /// Current state, if the automaton has been reset
    pub fn current_state(&self) -> Option<StateId> {
        self.cursor.map(|c| c.state)
    }

    /// Region header as verified
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Shape found by the last verification
    pub fn layout(&self) -> &VerifiedLayout {
        &self.layout
    }

    /// Ids of all states, ascending
    pub fn state_ids(&self) -> impl Iterator<Item = StateId> + '_ {
        self.index.ids()
    }

    /// Outgoing transitions of state `id`, in stored order
    pub fn transitions(&self, id: StateId) -> Result<Vec<Transition>> {
        let offset = self.index.get(id).ok_or(StateFault::Missing(id))?;
        self.edges(id, offset)?.collect()
    }

    /// The whole region
    pub fn as_bytes(&self) -> &[u8] {
        self.arena.as_bytes()
    }
}

struct Transitions<'a> {
    region: &'a [u8],
    state: StateId,
    offset: usize,
    next: u64,
    count: u64,
}

impl Iterator for Transitions<'_> {
    type Item = Result<Transition>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.count {
            return None;
        }

        let index = self.next;
        self.next += 1;
        let record = match TransitionRecord::read(self.region, self.offset) {
            Ok(record) => record,
            Err(fault) => {
                self.next = self.count;
                return Some(Err(fault.into()));
            }
        };
        self.offset += TRANSITION_RECORD_SIZE;

        if record.magic != TRANSITION_MAGIC {
            self.next = self.count;
            return Some(Err(GuardError::InvalidTransition {
                state: self.state,
                index,
            }));
        }

        Some(Ok(Transition {
            label: record.label,
            target: record.target,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::builder::AutomatonBuilder;
    use crate::automaton::env::HostEnv;

    fn example() -> Automaton {
        let mut builder =
            AutomatonBuilder::new(&ArenaConfig::default().with_capacity(4096), Arc::new(HostEnv))
                .unwrap();
        builder.add_state(0, &[(10, 0), (1, 1), (10, 2)]).unwrap();
        builder.add_state(1, &[(20, 1), (10, 2)]).unwrap();
        builder.add_state(2, &[]).unwrap();
        builder.finalize().unwrap()
    }

    #[test]
    fn test_accepting_sequence() {
        let mut automaton = example();
        assert_eq!(automaton.reset().unwrap(), 0);

        let reached: Vec<_> = [10, 1, 10]
            .iter()
            .map(|label| automaton.commit(*label).unwrap())
            .collect();
        assert_eq!(reached, vec![0, 1, 2]);
        assert_eq!(automaton.current_state(), Some(2));
    }

    #[test]
    fn test_violation_keeps_cursor() {
        let mut automaton = example();
        automaton.reset().unwrap();
        assert_eq!(automaton.commit(1).unwrap(), 1);

        match automaton.commit(99) {
            Err(GuardError::PolicyViolation { state, label }) => {
                assert_eq!(state, 1);
                assert_eq!(label, 99);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(automaton.current_state(), Some(1));
        assert_eq!(automaton.commit(20).unwrap(), 1);
    }

    #[test]
    fn test_first_matching_label_wins() {
        let mut automaton = example();
        automaton.reset().unwrap();
        assert_eq!(automaton.probe(10), Some(0));
        assert_eq!(automaton.commit(10).unwrap(), 0);
    }

    #[test]
    fn test_transition_into_initial_state_is_allowed() {
        let mut automaton = example();
        automaton.reset().unwrap();
        // Target 0 is a real state, not "no match".
        assert_eq!(automaton.probe(10), Some(0));
        assert_eq!(automaton.probe(7), None);
    }

    #[test]
    fn test_probe_does_not_move() {
        let mut automaton = example();
        automaton.reset().unwrap();
        assert_eq!(automaton.probe(1), Some(1));
        assert_eq!(automaton.current_state(), Some(0));
    }

    #[test]
    fn test_commit_before_reset() {
        let mut automaton = example();
        assert_eq!(automaton.probe(1), None);
        assert!(matches!(
            automaton.commit(1),
            Err(GuardError::InvalidState(StateFault::NoCursor))
        ));
    }

    #[test]
    fn test_reset_without_initial_state() {
        let mut builder =
            AutomatonBuilder::new(&ArenaConfig::default().with_capacity(4096), Arc::new(HostEnv))
                .unwrap();
        builder.add_state(1, &[(3, 1)]).unwrap();
        let mut automaton = builder.finalize().unwrap();
        assert!(matches!(
            automaton.reset(),
            Err(GuardError::InvalidState(StateFault::Missing(0)))
        ));
    }

    #[test]
    fn test_sink_state_rejects_everything() {
        let mut automaton = example();
        automaton.reset().unwrap();
        automaton.commit(1).unwrap();
        automaton.commit(10).unwrap();
        assert!(automaton.commit(10).unwrap_err().is_policy_violation());
        assert!(automaton.commit(20).unwrap_err().is_policy_violation());
    }

    #[test]
    fn test_commit_from_id_beyond_state_count() {
        let mut builder =
            AutomatonBuilder::new(&ArenaConfig::default().with_capacity(4096), Arc::new(HostEnv))
                .unwrap();
        builder.add_state(0, &[(1, 5)]).unwrap();
        builder.add_state(5, &[(2, 0)]).unwrap();
        let mut automaton = builder.finalize().unwrap();
        assert_eq!(automaton.header().num_states, 2);

        automaton.reset().unwrap();
        assert_eq!(automaton.commit(1).unwrap(), 5);
        assert_eq!(automaton.probe(2), Some(0));
        assert!(matches!(
            automaton.commit(2),
            Err(GuardError::InvalidState(StateFault::OutOfRange(5)))
        ));
        assert_eq!(automaton.current_state(), Some(5));
    }

    #[test]
    fn test_target_without_record() {
        let mut builder =
            AutomatonBuilder::new(&ArenaConfig::default().with_capacity(4096), Arc::new(HostEnv))
                .unwrap();
        builder.add_state(0, &[(5, 1)]).unwrap();
        builder.add_state(1, &[(6, 1), (7, 2)]).unwrap();
        let mut automaton = builder.finalize().unwrap();
        automaton.reset().unwrap();
        automaton.commit(5).unwrap();
        assert!(matches!(
            automaton.commit(7),
            Err(GuardError::InvalidState(StateFault::Missing(2)))
        ));
        assert_eq!(automaton.current_state(), Some(1));
    }

    #[test]
    fn test_introspection() {
        let automaton = example();
        assert_eq!(automaton.state_ids().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(
            automaton.transitions(1).unwrap(),
            vec![
                Transition { label: 20, target: 1 },
                Transition { label: 10, target: 2 },
            ]
        );
        assert!(automaton.transitions(2).unwrap().is_empty());
        assert!(automaton.transitions(9).is_err());
        assert_eq!(automaton.layout().transitions, 5);
    }
}
