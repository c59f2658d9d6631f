//! Unified error type for archiveforge.
//!
//! All library crates funnel their failures into [`Error`]. The variants map
//! onto the fault classes the batch driver cares about: tool start failures
//! are fatal for an asset, reconstruction and decryption faults abort one
//! asset, and cancellation is reported separately so it is never counted as
//! a failure of the asset itself.

use std::fmt;

/// Unified error type covering all failure modes in archiveforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "container", "object").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Input or configuration failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The asset cannot be packaged as stored, e.g. it has no packageable
    /// tracks. Raised before any work is done for the asset.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (packager, ffmpeg) could not be run.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// A server or client manifest could not be parsed.
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Media data is malformed or unsupported.
    #[error("Media error: {0}")]
    Media(String),

    /// Reconstruction of a track failed.
    #[error("Reconstruction error [{track}]: {message}")]
    Reconstruction {
        /// The track (or input identifier) being reconstructed.
        track: String,
        /// Human-readable error description.
        message: String,
    },

    /// Storage decryption failed.
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// The operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Reconstruction`].
    pub fn reconstruction(track: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Reconstruction {
            track: track.into(),
            message: message.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Media`].
    pub fn media(message: impl Into<String>) -> Self {
        Error::Media(message.into())
    }

    /// Whether this error means the asset was never started and should be
    /// skipped rather than counted as failed.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::Precondition(_))
    }

    /// Whether this error aborts the asset outright rather than being a
    /// recoverable, reported condition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Tool { .. })
    }

    /// Whether this error is the result of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
