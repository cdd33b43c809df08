//! callguard
//!
//! Call-sequence sandboxing automaton. A policy is a finite automaton whose
//! transitions are labelled with intercepted call identifiers; it is stored in
//! one flat, verifiable region that can be built offline, persisted, copied
//! into a privileged context and walked one call at a time.

#![deny(rust_2018_idioms)]
#![warn(missing_docs)]

pub mod automaton;
pub mod config;
pub mod enforce;
pub mod error;
pub mod policy;
pub mod utils;

pub use automaton::{Automaton, AutomatonBuilder, CallLabel, StateId};
pub use config::{ArenaConfig, EnvironmentConfig, GuardConfig};
pub use enforce::{SubjectRegistry, ViolationLog};
pub use error::{GuardError, Result};
pub use policy::PolicyFile;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
