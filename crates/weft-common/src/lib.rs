//! Identifier types for Weft repositories
//!
//! Validated string newtypes shared across the workspace:
//!
//! - [`Did`]: decentralized identifier naming a repository's owner
//! - [`Nsid`]: namespaced collection identifier grouping records by type
//! - [`RecordKey`]: key naming a record within a collection
//!
//! Constructors validate against the identifier grammar and fail with a
//! structured [`IdentError`]. Once constructed, values are immutable and can
//! be compared, hashed, and used as map keys.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod did;
mod error;
mod nsid;
mod recordkey;

pub use did::Did;
pub use error::{IdentError, IdentErrorKind};
pub use nsid::Nsid;
pub use recordkey::RecordKey;
