//! Core type definitions for Warden.
//!
//! This crate defines the data model shared by the analyzer host and the
//! plugins it runs:
//! - Issue, fix and session identifiers (UUID v7)
//! - Rules, issues, text edits and fixes
//! - Plugin metadata and declared capabilities
//! - Analysis and fix session records
//! - The [`DiagnosticCapability`] trait every plugin implements

mod capability;
mod diagnostic;
mod edit;
mod ids;
mod plugin;
mod session;

pub use capability::{CapabilityError, DiagnosticCapability};
pub use diagnostic::{Confidence, Issue, Rule, Severity};
pub use edit::{ConflictStrategy, Fix, FixConflict, FixOutcome, Position, TextEdit};
pub use ids::{FixId, IssueId, SessionId};
pub use plugin::{Capabilities, PluginMetadata, HOST_API_VERSION};
pub use session::{
    AnalysisRequest, AnalysisResult, AnalysisSession, FixApplyRequest, FixSession,
    FixSessionSummary, RollbackResult, Statistics,
};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),
}
