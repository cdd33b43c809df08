//! Call-sequence automaton stored in a single flat region

pub mod arena;
pub mod builder;
pub mod env;
pub mod index;
pub mod layout;
pub mod persist;
pub mod runtime;
pub mod verifier;

pub use arena::Arena;
pub use builder::AutomatonBuilder;
pub use env::{BoundedEnv, Environment, HostEnv};
pub use index::StateIndex;
pub use layout::{CallLabel, Header, StateId};
pub use runtime::{Automaton, Transition, INITIAL_STATE};
pub use verifier::{verify, VerifiedLayout};
