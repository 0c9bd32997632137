//! Error types for the source subsystem.

use thiserror::Error;

/// Errors that can occur while loading sources or talking to them.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Source not registered
    #[error("source not found: {source_id}")]
    NotFound {
        /// The source ID that was not found
        source_id: String,
    },

    /// Failed to read a source definition file
    #[error("failed to load source definition from {path}: {reason}")]
    LoadError {
        /// Path to the definition file
        path: String,
        /// Underlying error
        reason: String,
    },

    /// Failed to parse source definition TOML
    #[error("failed to parse source definition TOML in {path}: {source}")]
    ParseError {
        /// Path to the definition file
        path: String,
        /// TOML parse error
        #[source]
        source: toml::de::Error,
    },

    /// Invalid source definition (validation failed)
    #[error("invalid source definition for {source_id}: {reason}")]
    ValidationError {
        /// Source ID being validated
        source_id: String,
        /// Reason for validation failure
        reason: String,
    },

    /// Source definition directory not found
    #[error("source definitions directory not found at {path}")]
    DirectoryNotFound {
        /// Expected directory path
        path: String,
    },

    /// Network failure that may succeed on retry (timeout, reset, DNS)
    #[error("transient fetch failure for {url}: {message}")]
    Transient {
        /// URL being fetched
        url: String,
        /// Error message
        message: String,
    },

    /// Non-retryable HTTP status
    #[error("HTTP {status} from {url}")]
    Http {
        /// URL being fetched
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Page could not be turned into candidates
    #[error("extraction failed for {source_id}: {reason}")]
    Extraction {
        /// Source ID
        source_id: String,
        /// Reason
        reason: String,
    },

    /// Cursor produced by a different adapter or corrupted
    #[error("invalid cursor '{cursor}' for {source_id}")]
    InvalidCursor {
        /// Source ID
        source_id: String,
        /// The rejected cursor
        cursor: String,
    },

    /// I/O error while accessing source definitions
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid source ID format
    #[error("invalid source ID: {0}")]
    InvalidId(#[from] leadscout_core::LeadScoutError),
}

impl SourceError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient { .. } => true,
            Self::Http { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }
}

/// HTTP statuses worth retrying under backoff.
#[must_use]
pub fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

/// Result type for source operations.
pub type Result<T> = std::result::Result<T, SourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let timeout = SourceError::Transient {
            url: "https://maps.example.com".to_string(),
            message: "operation timed out".to_string(),
        };
        assert!(timeout.is_transient());

        let server = SourceError::Http {
            url: "https://maps.example.com".to_string(),
            status: 503,
        };
        assert!(server.is_transient());

        let gone = SourceError::Http {
            url: "https://maps.example.com".to_string(),
            status: 404,
        };
        assert!(!gone.is_transient());

        let missing = SourceError::NotFound {
            source_id: "yelp".to_string(),
        };
        assert!(!missing.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = SourceError::Http {
            url: "https://yelp.example.com/search".to_string(),
            status: 403,
        };
        assert_eq!(err.to_string(), "HTTP 403 from https://yelp.example.com/search");
    }
}
