//! Signed commits forming the append-only history chain
//!
//! Every mutation of the repository produces exactly one [`Commit`]. Commits
//! link to their predecessor by CID, so the chain from the head back to the
//! genesis commit is a tamper-evident log: changing any commit changes its
//! CID and breaks every later `prev` link.

use crate::cid::{canonical_bytes, cid_serde_opt, compute_cid};
use crate::error::Result;
use crate::platform::{Crypto, hex_bytes};
use ::cid::Cid as IpldCid;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use weft_common::{Did, Nsid, RecordKey};

/// The operation a commit records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommitOp {
    /// Genesis commit establishing the repository identity
    Init,
    /// A record was created
    Create {
        /// Collection the record belongs to
        collection: Nsid,
        /// Record key within the collection
        rkey: RecordKey,
        /// CID of the record value
        #[serde(with = "crate::cid::cid_serde")]
        data: IpldCid,
    },
    /// A record was updated in place
    Update {
        /// Collection the record belongs to
        collection: Nsid,
        /// Record key within the collection
        rkey: RecordKey,
        /// CID of the record value after the update
        #[serde(with = "crate::cid::cid_serde")]
        data: IpldCid,
    },
    /// A record was deleted
    Delete {
        /// Collection the record belonged to
        collection: Nsid,
        /// Record key within the collection
        rkey: RecordKey,
    },
}

impl CommitOp {
    /// The collection this operation touches, if any
    pub fn collection(&self) -> Option<&Nsid> {
        match self {
            CommitOp::Init => None,
            CommitOp::Create { collection, .. }
            | CommitOp::Update { collection, .. }
            | CommitOp::Delete { collection, .. } => Some(collection),
        }
    }

    /// The record key this operation touches, if any
    pub fn rkey(&self) -> Option<&RecordKey> {
        match self {
            CommitOp::Init => None,
            CommitOp::Create { rkey, .. }
            | CommitOp::Update { rkey, .. }
            | CommitOp::Delete { rkey, .. } => Some(rkey),
        }
    }
}

/// A signed entry in the repository history.
///
/// The signature covers the canonical encoding of the commit with `sig` set
/// to empty bytes; the commit's CID covers the full signed encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Repository identity that authored the commit
    pub did: Did,
    /// Operation recorded by this commit
    pub op: CommitOp,
    /// CID of the previous commit; `None` only for the genesis commit
    #[serde(with = "cid_serde_opt")]
    pub prev: Option<IpldCid>,
    /// Milliseconds since the Unix epoch, from the repository clock
    pub timestamp: i64,
    /// Signature over [`Commit::signing_bytes`], hex-encoded in transit
    #[serde(with = "hex_bytes")]
    pub sig: Bytes,
}

impl Commit {
    /// Build an unsigned commit; call [`Commit::sign`] before storing it
    pub fn new_unsigned(did: Did, op: CommitOp, prev: Option<IpldCid>, timestamp: i64) -> Self {
        Self {
            did,
            op,
            prev,
            timestamp,
            sig: Bytes::new(),
        }
    }

    /// Canonical bytes the signature covers (the commit with `sig` emptied)
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        let mut unsigned = self.clone();
        unsigned.sig = Bytes::new();
        canonical_bytes(&unsigned)
    }

    /// Sign the commit with the given secret key
    pub fn sign<C: Crypto>(&mut self, crypto: &C, secret: &[u8]) -> Result<()> {
        let bytes = self.signing_bytes()?;
        self.sig = crypto.sign(secret, &bytes)?;
        Ok(())
    }

    /// Verify the signature against the given public key
    pub fn verify<C: Crypto>(&self, crypto: &C, public: &[u8]) -> Result<bool> {
        let bytes = self.signing_bytes()?;
        crypto.verify(public, &bytes, &self.sig)
    }

    /// CID of the full signed commit
    pub fn cid(&self) -> Result<IpldCid> {
        compute_cid(&canonical_bytes(self)?)
    }
}
