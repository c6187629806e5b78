//! Error types for repository operations

use std::error::Error;
use std::fmt;

/// Boxed error type for error sources
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result type alias for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

/// Repository operation error with rich diagnostics
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub struct RepoError {
    kind: RepoErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<String>,
    context: Option<String>,
}

/// Error categories for repository operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoErrorKind {
    /// Malformed identifier or value
    Validation,
    /// Write to an existing key in an append-only collection
    DuplicateKey,
    /// Resource not found
    NotFound,
    /// Storage backend I/O failure
    Storage,
    /// Signing or verification failed
    Crypto,
    /// Document merge failed
    Merge,
    /// Snapshot chain or signature verification failed
    Integrity,
    /// Serialization/deserialization failed
    Serialization,
}

impl RepoError {
    /// Create a new error with the given kind and optional source
    pub fn new(kind: RepoErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source,
            help: None,
            context: None,
        }
    }

    /// Add a help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add context information to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> &RepoErrorKind {
        &self.kind
    }

    // Constructors for different error kinds

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::Validation, Some(msg.into().into()))
    }

    /// Create a duplicate key error
    pub fn duplicate(collection: impl fmt::Display, rkey: impl fmt::Display) -> Self {
        Self::new(RepoErrorKind::DuplicateKey, None)
            .with_context(format!("record already exists: {}/{}", collection, rkey))
            .with_help("records in append-only collections cannot be rewritten")
    }

    /// Create a not found error
    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        Self::new(RepoErrorKind::NotFound, None)
            .with_context(format!("{} not found: {}", resource, id))
    }

    /// Create a storage error
    pub fn storage(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Storage, Some(Box::new(source)))
    }

    /// Create a crypto error from an underlying failure
    pub fn crypto(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Crypto, Some(Box::new(source)))
    }

    /// Create a crypto error from a message
    pub fn crypto_msg(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::Crypto, Some(msg.into().into()))
    }

    /// Create an integrity error
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::Integrity, Some(msg.into().into()))
            .with_help("the snapshot does not verify against its declared identity and head")
    }

    /// Create a serialization error
    pub fn serialization(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Serialization, Some(Box::new(source)))
    }
}

impl fmt::Display for RepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;

        if let Some(ctx) = &self.context {
            write!(f, ": {}", ctx)?;
        }

        if let Some(src) = &self.source {
            write!(f, ": {}", src)?;
        }

        Ok(())
    }
}

impl From<weft_common::IdentError> for RepoError {
    fn from(e: weft_common::IdentError) -> Self {
        Self::new(RepoErrorKind::Validation, Some(Box::new(e)))
    }
}

// Internal granular errors

/// Document-specific errors (CRDT wrapper)
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum DocError {
    /// Document roots must be JSON objects
    #[error("document value must be a JSON object")]
    RootNotObject,

    /// Underlying CRDT operation failed
    #[error("document operation failed")]
    Automerge(#[source] automerge::AutomergeError),

    /// Saved document bytes failed to load
    #[error("saved document failed to load")]
    Load(#[source] automerge::AutomergeError),
}

impl From<DocError> for RepoError {
    fn from(e: DocError) -> Self {
        match e {
            DocError::RootNotObject => RepoError::new(RepoErrorKind::Merge, Some(Box::new(e)))
                .with_help("only JSON objects can back a mergeable document"),
            DocError::Automerge(_) | DocError::Load(_) => {
                RepoError::new(RepoErrorKind::Merge, Some(Box::new(e)))
            }
        }
    }
}
