//! Producer-side policy description
//!
//! The offline analysis emits a list of states with their labelled
//! transitions. This is the JSON form of that list; building it replays the
//! states through [`AutomatonBuilder`] in file order and finalizes.

use crate::automaton::{Automaton, AutomatonBuilder, CallLabel, Environment, StateId};
use crate::config::ArenaConfig;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// A whole automaton, as produced by the analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PolicyFile {
    /// States in allocation order; state 0 is the entry state
    pub states: Vec<StateEntry>,
}

/// One state and its outgoing transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    /// State id
    pub id: StateId,
    /// Outgoing transitions, first match wins
    #[serde(default)]
    pub transitions: Vec<TransitionEntry>,
}

/// One labelled transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEntry {
    /// Call label
    pub call: CallLabel,
    /// Target state id
    pub target: StateId,
}

impl PolicyFile {
    /// Load a policy from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save a policy as JSON
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Build, finalize and verify the automaton
    pub fn build(&self, config: &ArenaConfig, env: Arc<dyn Environment>) -> Result<Automaton> {
        let mut builder = AutomatonBuilder::new(config, env)?;
        for state in &self.states {
            let edges: Vec<(CallLabel, StateId)> = state
                .transitions
                .iter()
                .map(|t| (t.call, t.target))
                .collect();
            builder.add_state(state.id, &edges)?;
        }

        info!("Built policy with {} states", self.states.len());
        builder.finalize()
    }

    /// Read back the states of a verified automaton, ordered by id
    pub fn from_automaton(automaton: &Automaton) -> Result<Self> {
        let states = automaton
            .state_ids()
            .map(|id| {
                let transitions = automaton
                    .transitions(id)?
                    .into_iter()
                    .map(|t| TransitionEntry {
                        call: t.label,
                        target: t.target,
                    })
                    .collect();
                Ok(StateEntry { id, transitions })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { states })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::HostEnv;
    use crate::error::GuardError;

    const SAMPLE: &str = r#"{
        "states": [
            { "id": 0, "transitions": [ { "call": 10, "target": 0 }, { "call": 1, "target": 1 } ] },
            { "id": 1, "transitions": [ { "call": 20, "target": 1 } ] },
            { "id": 2 }
        ]
    }"#;

    #[test]
    fn test_parse_and_build() {
        let policy: PolicyFile = serde_json::from_str(SAMPLE).unwrap();
        assert!(policy.states[2].transitions.is_empty());

        let mut automaton = policy
            .build(&ArenaConfig::default().with_capacity(4096), Arc::new(HostEnv))
            .unwrap();
        automaton.reset().unwrap();
        assert_eq!(automaton.commit(1).unwrap(), 1);
        assert_eq!(automaton.commit(20).unwrap(), 1);
    }

    #[test]
    fn test_from_automaton_matches_source() {
        let policy: PolicyFile = serde_json::from_str(SAMPLE).unwrap();
        let automaton = policy
            .build(&ArenaConfig::default().with_capacity(4096), Arc::new(HostEnv))
            .unwrap();
        assert_eq!(PolicyFile::from_automaton(&automaton).unwrap(), policy);
    }

    #[test]
    fn test_duplicate_ids_fail_build() {
        let policy = PolicyFile {
            states: vec![
                StateEntry { id: 0, transitions: vec![] },
                StateEntry { id: 0, transitions: vec![] },
            ],
        };
        assert!(matches!(
            policy.build(&ArenaConfig::default(), Arc::new(HostEnv)),
            Err(GuardError::DuplicateState(0))
        ));
    }
}
