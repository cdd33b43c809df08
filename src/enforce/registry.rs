//! One independent automaton per monitored subject

use super::violations::{SubjectId, Violation, ViolationLog};
use crate::automaton::{Automaton, CallLabel, Environment, StateId};
use crate::config::ArenaConfig;
use crate::error::{GuardError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

/// Instance handles keyed by subject.
///
/// Each subject walks its own copy of the automaton, so subjects never share
/// a cursor.
pub struct SubjectRegistry {
    config: ArenaConfig,
    env: Arc<dyn Environment>,
    instances: HashMap<SubjectId, Automaton>,
    violations: ViolationLog,
}

impl SubjectRegistry {
    /// Create an empty registry
    pub fn new(config: ArenaConfig, env: Arc<dyn Environment>) -> Self {
        Self {
            config,
            env,
            instances: HashMap::new(),
            violations: ViolationLog::new(),
        }
    }

    /// Copy `region` in for `subject`, verify it and reset it.
    ///
    /// Replaces any automaton the subject already had. On failure the
    /// subject is left without an automaton.
    pub fn attach(&mut self, subject: SubjectId, region: &[u8]) -> Result<()> {
        self.instances.remove(&subject);

        let mut automaton = Automaton::from_bytes(region, &self.config, Arc::clone(&self.env))?;
        automaton.reset()?;
        self.instances.insert(subject, automaton);

        info!("Attached automaton to subject {}", subject);
        Ok(())
    }

    /// Feed one intercepted call for `subject`.
    ///
    /// A `PolicyViolation` is logged before it is returned. The caller
    /// decides what happens to the subject.
    pub fn on_call(&mut self, subject: SubjectId, label: CallLabel) -> Result<StateId> {
        let automaton = self
            .instances
            .get_mut(&subject)
            .ok_or(GuardError::UnknownSubject(subject))?;

        let result = automaton.commit(label);
        if let Err(GuardError::PolicyViolation { state, label }) = &result {
            self.violations.record(Violation {
                subject,
                state: *state,
                label: *label,
                timestamp: SystemTime::now(),
            });
        }
        result
    }

    /// Return `subject` to the initial state
    pub fn reset(&mut self, subject: SubjectId) -> Result<StateId> {
        self.instances
            .get_mut(&subject)
            .ok_or(GuardError::UnknownSubject(subject))?
            .reset()
    }

    /// Tear down the automaton of `subject`
    pub fn detach(&mut self, subject: SubjectId) -> bool {
        let removed = self.instances.remove(&subject).is_some();
        if removed {
            debug!("Detached automaton from subject {}", subject);
        }
        removed
    }

    /// Current state of `subject`
    pub fn current_state(&self, subject: SubjectId) -> Option<StateId> {
        self.instances.get(&subject)?.current_state()
    }

    /// Number of attached subjects
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether no subject is attached
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Violation log shared by all subjects
    pub fn violations(&self) -> &ViolationLog {
        &self.violations
    }
}
