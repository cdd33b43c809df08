//! Utility modules

pub mod debug;

pub use debug::DebugLogger;
