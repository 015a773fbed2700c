// Error things.
pub use miette::{Context, IntoDiagnostic};

// Serde things.
pub use serde::Serialize;

// Aliases.

/// The standard result for this application.
pub type AppResult<T = ()> = miette::Result<T>;

/// The sentinel for any dimension value we could not find or derive.
pub const UNKNOWN: &str = "Unknown";
