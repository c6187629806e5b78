//! Snapshot export, backup, and restore
//!
//! A [`Snapshot`] is a flat, portable JSON document holding a repository's
//! full record and commit set. Three flavors share the shape:
//!
//! - [`Repository::export`]: everything except key material
//! - [`Repository::export_for_publish`]: additionally strips private
//!   collections and document edit histories
//! - [`Repository::backup`]: includes the signing keypair, making the
//!   artifact security-sensitive and the only flavor that can be restored
//!
//! Restore validates the entire snapshot (commit chain, signatures, record
//! CIDs) before touching storage, so a rejected snapshot leaves the prior
//! repository state untouched.

use crate::cid::{cid_serde, cid_serde_opt, value_cid};
use crate::commit::Commit;
use crate::error::{RepoError, Result};
use crate::document::Document;
use crate::platform::{Clock, Crypto, Keypair};
use crate::record::Record;
use crate::repo::{Identity, Repository, encode};
use crate::storage::{KvStore, keys};
use ::cid::Cid as IpldCid;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use weft_common::{Did, Nsid, RecordKey};

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Portable export of a repository's full record and commit set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot format version
    pub version: u32,
    /// Repository identity the snapshot was taken from
    pub did: Did,
    /// Hex-encoded public verification key
    pub public_key: String,
    /// Head commit CID at export time; `None` for an empty repository
    #[serde(with = "cid_serde_opt")]
    pub head: Option<IpldCid>,
    /// Signing keypair, present only in artifacts from [`Repository::backup`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypair: Option<Keypair>,
    /// Records ordered by collection then key
    pub records: Vec<SnapshotRecord>,
    /// Commits ordered from genesis to head
    pub commits: Vec<SnapshotCommit>,
}

/// One record in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Collection the record belongs to
    pub collection: Nsid,
    /// Record key within the collection
    pub key: RecordKey,
    /// CID of the record value
    #[serde(with = "cid_serde")]
    pub cid: IpldCid,
    /// Materialized record value
    pub value: Value,
    /// Creation timestamp, milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Serialized document history for mutable records
    #[serde(default, with = "crate::record::base64_bytes_opt", skip_serializing_if = "Option::is_none")]
    pub doc: Option<Bytes>,
}

/// One commit in a snapshot, addressed by its CID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCommit {
    /// CID of the full signed commit
    #[serde(with = "cid_serde")]
    pub cid: IpldCid,
    /// The commit itself
    #[serde(flatten)]
    pub commit: Commit,
}

impl Snapshot {
    /// Serialize to a JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(RepoError::serialization)
    }

    /// Parse a snapshot from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(RepoError::serialization)
    }
}

impl<S, C, X> Repository<S, C, X>
where
    S: KvStore,
    C: Clock,
    X: Crypto,
{
    /// Export the full repository state, without key material
    pub async fn export(&self) -> Result<Snapshot> {
        self.assemble(true, true, false).await
    }

    /// Export the state intended for external visibility.
    ///
    /// Excludes private collections, document edit histories, and key
    /// material. Not restorable; use [`Repository::backup`] for that.
    pub async fn export_for_publish(&self) -> Result<Snapshot> {
        self.assemble(false, false, false).await
    }

    /// Export everything needed to resume signing elsewhere, including the
    /// secret key. Treat the artifact like the key itself.
    pub async fn backup(&self) -> Result<Snapshot> {
        self.assemble(true, true, true).await
    }

    async fn assemble(
        &self,
        include_private: bool,
        include_docs: bool,
        include_keypair: bool,
    ) -> Result<Snapshot> {
        let identity = self.identity_for_snapshot()?;

        let mut records = Vec::new();
        for key in self.store.list(keys::RECORDS_PREFIX).await? {
            let Some(bytes) = self.store.get(&key).await? else {
                continue;
            };
            let record: Record = crate::repo::decode(&bytes)?;
            if !include_private && self.is_private_collection(&record.collection) {
                continue;
            }
            records.push(SnapshotRecord {
                cid: record.cid()?,
                collection: record.collection,
                key: record.rkey,
                value: record.value,
                timestamp: record.created_at,
                doc: if include_docs { record.doc } else { None },
            });
        }
        records.sort_by(|a, b| {
            a.collection
                .cmp(&b.collection)
                .then_with(|| a.key.cmp(&b.key))
        });

        let commits = self
            .commits()
            .await?
            .into_iter()
            .map(|(cid, commit)| SnapshotCommit { cid, commit })
            .collect::<Vec<_>>();

        debug!(
            records = records.len(),
            commits = commits.len(),
            keyed = include_keypair,
            "assembled snapshot"
        );
        Ok(Snapshot {
            version: SNAPSHOT_VERSION,
            did: identity.did.clone(),
            public_key: hex::encode(identity.public_key()),
            head: self.head,
            keypair: include_keypair.then(|| identity.keypair.clone()),
            records,
            commits,
        })
    }

    /// Replace all repository state with the contents of a backup snapshot.
    ///
    /// Validates everything before the first write: the commit chain must
    /// link from genesis to the declared head, every commit CID and signature
    /// must verify against the declared identity, and every record CID must
    /// match its value. Any failure rejects the snapshot with an integrity
    /// error and leaves the prior state untouched.
    ///
    /// Only snapshots carrying key material can be restored, since the
    /// repository could not sign new commits without it.
    pub async fn restore(&mut self, snapshot: &Snapshot) -> Result<()> {
        let keypair = snapshot.keypair.as_ref().ok_or_else(|| {
            RepoError::validation("snapshot carries no key material")
                .with_help("only artifacts produced by backup() can be restored")
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(RepoError::validation(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let public = hex::decode(&snapshot.public_key)
            .map(Bytes::from)
            .map_err(|_| RepoError::validation("snapshot public key is not valid hex"))?;
        if keypair.public != public {
            return Err(RepoError::integrity(
                "snapshot keypair does not match its declared public key",
            ));
        }

        self.validate_chain(snapshot, &public)?;
        self.validate_records(snapshot)?;

        // validation passed: wipe and rewrite
        self.wipe().await?;

        let identity = Identity {
            did: snapshot.did.clone(),
            keypair: keypair.clone(),
        };
        self.store.put(keys::IDENTITY, &encode(&identity)?).await?;

        for entry in &snapshot.records {
            let record = Record {
                collection: entry.collection.clone(),
                rkey: entry.key.clone(),
                value: entry.value.clone(),
                doc: entry.doc.clone(),
                created_at: entry.timestamp,
            };
            self.store
                .put(
                    &keys::record_key(&entry.collection, &entry.key),
                    &encode(&record)?,
                )
                .await?;
        }
        for entry in &snapshot.commits {
            self.store
                .put(&keys::commit_key(&entry.cid), &encode(&entry.commit)?)
                .await?;
        }
        if let Some(head) = snapshot.head {
            self.store
                .put(keys::HEAD, head.to_string().as_bytes())
                .await?;
        }

        self.identity = Some(identity);
        self.head = snapshot.head;

        info!(
            did = %snapshot.did,
            records = snapshot.records.len(),
            commits = snapshot.commits.len(),
            "restored repository from snapshot"
        );
        Ok(())
    }

    fn validate_chain(&self, snapshot: &Snapshot, public: &[u8]) -> Result<()> {
        let mut prev: Option<IpldCid> = None;
        for entry in &snapshot.commits {
            let commit = &entry.commit;
            if commit.did != snapshot.did {
                return Err(RepoError::integrity(format!(
                    "commit {} was authored by {}, snapshot declares {}",
                    entry.cid, commit.did, snapshot.did
                )));
            }
            let recomputed = commit.cid()?;
            if recomputed != entry.cid {
                return Err(RepoError::integrity(format!(
                    "commit content does not match its declared CID {}",
                    entry.cid
                )));
            }
            if commit.prev != prev {
                return Err(RepoError::integrity(format!(
                    "broken chain at commit {}",
                    entry.cid
                )));
            }
            if !commit.verify(&self.crypto, public)? {
                warn!(cid = %entry.cid, "snapshot commit signature failed verification");
                return Err(RepoError::integrity(format!(
                    "invalid signature on commit {}",
                    entry.cid
                )));
            }
            prev = Some(entry.cid);
        }

        if prev != snapshot.head {
            return Err(RepoError::integrity(
                "final commit does not match the declared head",
            ));
        }
        Ok(())
    }

    fn validate_records(&self, snapshot: &Snapshot) -> Result<()> {
        for entry in &snapshot.records {
            if value_cid(&entry.value)? != entry.cid {
                return Err(RepoError::integrity(format!(
                    "record {}/{} does not match its declared CID",
                    entry.collection, entry.key
                )));
            }
            if let Some(doc) = &entry.doc {
                Document::load(doc).map_err(|_| {
                    RepoError::integrity(format!(
                        "record {}/{} carries an unreadable document history",
                        entry.collection, entry.key
                    ))
                })?;
            }
        }
        Ok(())
    }

    fn identity_for_snapshot(&self) -> Result<&Identity> {
        self.identity
            .as_ref()
            .ok_or_else(|| RepoError::not_found("identity", "repository is not initialized"))
    }

    async fn wipe(&mut self) -> Result<()> {
        self.store.delete(keys::IDENTITY).await?;
        self.store.delete(keys::HEAD).await?;
        for key in self.store.list(keys::COMMITS_PREFIX).await? {
            self.store.delete(&key).await?;
        }
        for key in self.store.list(keys::RECORDS_PREFIX).await? {
            self.store.delete(&key).await?;
        }
        self.identity = None;
        self.head = None;
        Ok(())
    }
}
