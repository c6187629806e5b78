//! Content-addressed personal data repository engine
//!
//! This crate provides the building blocks for a verifiable, append-only
//! record repository:
//!
//! - **Commits**: signed commit structures forming a singly-linked chain from
//!   genesis to head, with signature verification
//! - **Records**: typed record CRUD over hierarchical storage keys, with
//!   CRDT-backed mutable singleton collections
//! - **Documents**: conflict-free mergeable JSON documents (Automerge)
//! - **Storage**: pluggable key/value storage abstraction with an in-memory
//!   reference implementation
//! - **Snapshots**: portable export/import of full repository state for
//!   backup, restore, and publishing
//!
//! # Design Philosophy
//!
//! - Deterministic on any host: storage, clock, and signing are injected
//! - Content addressing throughout: CIDs are computed from canonical DAG-CBOR
//!   bytes, so identical values always share an address
//! - Single logical writer per repository instance; no internal retries, all
//!   failures surface as typed errors
//!
//! # Example
//!
//! ```rust
//! use weft_repo::{MemoryKvStore, Repository};
//! use weft_common::{Did, Nsid, RecordKey};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut repo = Repository::open(MemoryKvStore::new()).await?;
//!
//! repo.init_identity(Did::new("did:plc:alice123")?).await?;
//!
//! let collection = Nsid::new("app.bsky.feed.post")?;
//! let rkey = RecordKey::new("post1")?;
//! let cid = repo
//!     .create_record(&collection, &rkey, &serde_json::json!({"text": "hello"}))
//!     .await?;
//!
//! for record in repo.list_records(&collection).await? {
//!     println!("{}: {} ({cid})", record.rkey, record.value);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

/// CID computation over canonical byte encodings
pub mod cid;
/// Commit structures and signature verification
pub mod commit;
/// Conflict-free mergeable JSON documents
pub mod document;
pub mod error;
/// Clock and signing abstractions
pub mod platform;
/// Record value types
pub mod record;
/// Repository operations over the commit graph
pub mod repo;
/// Snapshot export/import
pub mod snapshot;
/// Key/value storage abstraction
pub mod storage;

pub use ::cid::Cid;
pub use cid::compute_cid;
pub use commit::{Commit, CommitOp};
pub use document::Document;
pub use error::{RepoError, RepoErrorKind, Result};
pub use platform::{Clock, Crypto, Ed25519Crypto, Keypair, ManualClock, SystemClock};
pub use record::Record;
pub use repo::{Identity, POSTS_COLLECTION, PROFILE_COLLECTION, PROFILE_RKEY, Repository};
pub use snapshot::{SNAPSHOT_VERSION, Snapshot, SnapshotCommit, SnapshotRecord};
pub use storage::{KvStore, MemoryKvStore};
