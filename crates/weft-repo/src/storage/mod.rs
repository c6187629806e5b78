//! Key/value storage abstraction for records, commits, and identity material

use crate::error::Result;
use bytes::Bytes;

/// Async key/value storage trait
///
/// Keys are hierarchical strings; the repository reserves the prefixes laid
/// out in [`keys`]. Implementations might use:
/// - In-memory BTreeMap ([`MemoryKvStore`])
/// - A browser-native persistent store (host-provided)
/// - SQLite/RocksDB (host-provided)
///
/// Clone is required so hosts and tests can share a storage handle with the
/// repository that owns it.
///
/// # Contract
///
/// - `put` overwrites any existing value
/// - `get` on a missing key returns `Ok(None)`, not an error
/// - `list` returns the finite set of keys under a prefix, one-shot
/// - errors are reserved for backend I/O failure
#[trait_variant::make(Send)]
pub trait KvStore: Clone {
    /// Store a value under the given key
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve a value by key
    ///
    /// Returns `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Delete a value by key
    ///
    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List all keys under the given prefix
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Storage key layout reserved by the repository
pub mod keys {
    use ::cid::Cid as IpldCid;
    use weft_common::{Nsid, RecordKey};

    /// Identity material (DID + keypair)
    pub const IDENTITY: &str = "identity";
    /// Current head commit CID
    pub const HEAD: &str = "head";
    /// Prefix for commit entries, one commit per key
    pub const COMMITS_PREFIX: &str = "commits/";
    /// Prefix for record entries, one record per key
    pub const RECORDS_PREFIX: &str = "records/";

    /// Storage key for a commit, addressed by its CID
    pub fn commit_key(cid: &IpldCid) -> String {
        format!("{}{}", COMMITS_PREFIX, cid)
    }

    /// Storage key for a record
    pub fn record_key(collection: &Nsid, rkey: &RecordKey) -> String {
        format!("{}{}/{}", RECORDS_PREFIX, collection, rkey)
    }

    /// Prefix covering every record in a collection
    pub fn collection_prefix(collection: &Nsid) -> String {
        format!("{}{}/", RECORDS_PREFIX, collection)
    }
}

pub mod memory;

pub use memory::MemoryKvStore;
