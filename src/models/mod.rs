//! Data models for the SQL assistant server.
//!
//! This module re-exports all model types used throughout the application.

pub mod dialect;
pub mod session;
pub mod spec;

// Re-export commonly used types
pub use dialect::{Dialect, RowLimitStyle};
pub use session::SessionPhase;
pub use spec::{ConnectionSpec, REDACTED, SpecKey};
