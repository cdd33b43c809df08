//! Enforcement-side instance handles and violation tracking

pub mod registry;
pub mod violations;

pub use registry::SubjectRegistry;
pub use violations::{SubjectId, Violation, ViolationLog};
