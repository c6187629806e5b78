//! Validation errors for identifier strings

use smol_str::SmolStr;

/// Error produced when a string does not satisfy an identifier grammar.
///
/// `what` names the identifier kind (`did`, `nsid`, `record key`), `input`
/// is the offending source string, and `kind` carries the specific failure.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("invalid {what}: {kind}")]
pub struct IdentError {
    /// Identifier kind that failed validation
    pub what: SmolStr,
    /// The source string that failed
    #[source_code]
    pub input: String,
    /// The specific validation failure
    #[source]
    #[diagnostic_source]
    pub kind: IdentErrorKind,
}

/// The specific way an identifier string failed validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, miette::Diagnostic)]
pub enum IdentErrorKind {
    /// Input was empty
    #[error("empty string")]
    Empty,

    /// Input exceeded the maximum byte length
    #[error("too long: {actual} bytes (max {max})")]
    TooLong {
        /// Maximum allowed length
        max: usize,
        /// Actual length
        actual: usize,
    },

    /// Input did not match the identifier grammar
    #[error("does not match the grammar")]
    Grammar,
}

impl IdentError {
    /// Create an error with the given kind
    pub fn new(what: &'static str, input: impl Into<String>, kind: IdentErrorKind) -> Self {
        Self {
            what: SmolStr::new_static(what),
            input: input.into(),
            kind,
        }
    }

    /// Empty input
    pub fn empty(what: &'static str) -> Self {
        Self::new(what, "", IdentErrorKind::Empty)
    }

    /// Input over the length bound
    pub fn too_long(what: &'static str, input: &str, max: usize) -> Self {
        Self::new(
            what,
            input,
            IdentErrorKind::TooLong {
                max,
                actual: input.len(),
            },
        )
    }

    /// Input failed the grammar regex
    pub fn grammar(what: &'static str, input: &str) -> Self {
        Self::new(what, input, IdentErrorKind::Grammar)
    }
}
