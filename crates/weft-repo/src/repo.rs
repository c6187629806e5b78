//! The repository aggregate: identity, commit graph, and record CRUD
//!
//! A [`Repository`] owns one identity (DID + keypair), one head pointer, and
//! the records stored beneath it. Storage, time, and signing are injected so
//! the same engine runs in tests, native processes, and browser sandboxes.
//!
//! Every mutation follows the same durability order: the record write first,
//! then the commit under its content-addressed key, then the head pointer.
//! The head update is the single irrevocable step; if an earlier write fails,
//! the orphaned record or commit is harmless on the next listing.

use crate::commit::{Commit, CommitOp};
use crate::document::Document;
use crate::error::{RepoError, Result};
use crate::platform::{Clock, Crypto, Ed25519Crypto, Keypair, SystemClock};
use crate::record::Record;
use crate::storage::{KvStore, keys};
use ::cid::Cid as IpldCid;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, info};
use weft_common::{Did, Nsid, RecordKey};

/// Collection holding user posts, append-only
pub const POSTS_COLLECTION: &str = "app.bsky.feed.post";
/// Singleton profile collection, mergeable
pub const PROFILE_COLLECTION: &str = "app.bsky.actor.profile";
/// Record key of the profile singleton
pub const PROFILE_RKEY: &str = "self";

/// Identity material owned by a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// The repository owner's DID
    pub did: Did,
    /// Signing keypair; the secret never leaves storage except via `backup()`
    pub(crate) keypair: Keypair,
}

impl Identity {
    /// Public verification key bytes
    pub fn public_key(&self) -> &Bytes {
        &self.keypair.public
    }
}

/// Content-addressed, append-only repository over an injected key/value store.
///
/// Single logical writer: callers must serialize mutations into one instance.
/// Construct with [`Repository::open`] (system clock, Ed25519) or
/// [`Repository::open_with`] for injected collaborators in tests.
#[derive(Debug, Clone)]
pub struct Repository<S, C = SystemClock, X = Ed25519Crypto> {
    pub(crate) store: S,
    pub(crate) clock: C,
    pub(crate) crypto: X,
    pub(crate) identity: Option<Identity>,
    pub(crate) head: Option<IpldCid>,
    mutable_collections: BTreeSet<Nsid>,
    private_collections: BTreeSet<Nsid>,
}

impl<S: KvStore> Repository<S> {
    /// Open a repository over the given store with the default clock and
    /// signer, hydrating identity and head from storage if present
    pub async fn open(store: S) -> Result<Self> {
        Self::open_with(store, SystemClock, Ed25519Crypto).await
    }
}

impl<S, C, X> Repository<S, C, X>
where
    S: KvStore,
    C: Clock,
    X: Crypto,
{
    /// Open a repository with injected clock and crypto collaborators
    pub async fn open_with(store: S, clock: C, crypto: X) -> Result<Self> {
        let identity = match store.get(keys::IDENTITY).await? {
            Some(bytes) => Some(decode::<Identity>(&bytes)?),
            None => None,
        };
        let head = match store.get(keys::HEAD).await? {
            Some(bytes) => Some(parse_head(&bytes)?),
            None => None,
        };

        let mut mutable_collections = BTreeSet::new();
        mutable_collections.insert(Nsid::new(PROFILE_COLLECTION)?);

        debug!(
            initialized = identity.is_some(),
            has_head = head.is_some(),
            "opened repository"
        );
        Ok(Self {
            store,
            clock,
            crypto,
            identity,
            head,
            mutable_collections,
            private_collections: BTreeSet::new(),
        })
    }

    /// Register a collection as mergeable: updates route through the CRDT
    /// document instead of rejecting rewrites
    pub fn with_mutable_collection(mut self, collection: Nsid) -> Self {
        self.mutable_collections.insert(collection);
        self
    }

    /// Register a collection as private: excluded from
    /// [`Repository::export_for_publish`]
    pub fn with_private_collection(mut self, collection: Nsid) -> Self {
        self.private_collections.insert(collection);
        self
    }

    /// The repository's identity, if initialized
    pub fn get_did(&self) -> Option<&Did> {
        self.identity.as_ref().map(|identity| &identity.did)
    }

    /// CID of the most recent commit, if any
    pub fn head(&self) -> Option<&IpldCid> {
        self.head.as_ref()
    }

    /// Whether updates to this collection merge instead of rejecting
    pub fn is_mutable_collection(&self, collection: &Nsid) -> bool {
        self.mutable_collections.contains(collection)
    }

    pub(crate) fn is_private_collection(&self, collection: &Nsid) -> bool {
        self.private_collections.contains(collection)
    }

    /// Initialize the repository identity.
    ///
    /// Idempotent: if an identity already exists it is returned unchanged,
    /// even when called with a different DID. Otherwise generates a keypair,
    /// persists the identity, and appends the genesis commit.
    pub async fn init_identity(&mut self, did: Did) -> Result<Did> {
        if let Some(identity) = &self.identity {
            debug!(%identity.did, "identity already initialized");
            return Ok(identity.did.clone());
        }

        let keypair = self.crypto.generate_keypair()?;
        let identity = Identity {
            did: did.clone(),
            keypair,
        };
        let (cid, commit) = self.build_commit(&identity, CommitOp::Init)?;

        self.store
            .put(keys::IDENTITY, &encode(&identity)?)
            .await?;
        self.identity = Some(identity);
        self.put_commit(&cid, &commit).await?;
        self.set_head(cid).await?;

        info!(%did, "initialized repository identity");
        Ok(did)
    }

    /// Create a record.
    ///
    /// The value must be a JSON object. Fails with a duplicate-key error if
    /// `(collection, rkey)` already exists. For mutable collections the value
    /// also seeds a fresh mergeable document stored alongside the record.
    pub async fn create_record(
        &mut self,
        collection: &Nsid,
        rkey: &RecordKey,
        value: &Value,
    ) -> Result<IpldCid> {
        let identity = self.require_identity()?.clone();
        if !value.is_object() {
            return Err(RepoError::validation("record value must be a JSON object"));
        }
        let storage_key = keys::record_key(collection, rkey);
        if self.store.get(&storage_key).await?.is_some() {
            return Err(RepoError::duplicate(collection, rkey));
        }

        let doc = if self.is_mutable_collection(collection) {
            Some(Document::from_json(value).map_err(RepoError::from)?.save())
        } else {
            None
        };
        let record = Record {
            collection: collection.clone(),
            rkey: rkey.clone(),
            value: value.clone(),
            doc,
            created_at: self.clock.now(),
        };
        let data = record.cid()?;
        let op = CommitOp::Create {
            collection: collection.clone(),
            rkey: rkey.clone(),
            data,
        };
        let (commit_cid, commit) = self.build_commit(&identity, op)?;

        self.store.put(&storage_key, &encode(&record)?).await?;
        self.put_commit(&commit_cid, &commit).await?;
        self.set_head(commit_cid).await?;

        debug!(%collection, %rkey, cid = %data, "created record");
        Ok(data)
    }

    /// Update a record.
    ///
    /// For mutable collections this merges the new value into the existing
    /// document (creating it if absent) so concurrent edits survive. For
    /// append-only collections updates are rejected: a duplicate-key error if
    /// the record exists, not-found if it does not.
    pub async fn update_record(
        &mut self,
        collection: &Nsid,
        rkey: &RecordKey,
        value: &Value,
    ) -> Result<IpldCid> {
        let identity = self.require_identity()?.clone();
        let storage_key = keys::record_key(collection, rkey);
        let existing = match self.store.get(&storage_key).await? {
            Some(bytes) => Some(decode::<Record>(&bytes)?),
            None => None,
        };

        if !self.is_mutable_collection(collection) {
            return Err(match existing {
                Some(_) => RepoError::duplicate(collection, rkey),
                None => RepoError::not_found("record", format!("{}/{}", collection, rkey)),
            });
        }

        let (record, op) = match existing {
            Some(existing) => {
                let mut doc = match &existing.doc {
                    Some(bytes) => Document::load(bytes).map_err(RepoError::from)?,
                    // pre-history record: seed a document from its value
                    None => Document::from_json(&existing.value).map_err(RepoError::from)?,
                };
                doc.update(value).map_err(RepoError::from)?;
                let merged = doc.to_json();
                let record = Record {
                    collection: collection.clone(),
                    rkey: rkey.clone(),
                    value: merged,
                    doc: Some(doc.save()),
                    created_at: existing.created_at,
                };
                let data = record.cid()?;
                let op = CommitOp::Update {
                    collection: collection.clone(),
                    rkey: rkey.clone(),
                    data,
                };
                (record, op)
            }
            None => {
                let doc = Document::from_json(value).map_err(RepoError::from)?;
                let record = Record {
                    collection: collection.clone(),
                    rkey: rkey.clone(),
                    value: value.clone(),
                    doc: Some(doc.save()),
                    created_at: self.clock.now(),
                };
                let data = record.cid()?;
                let op = CommitOp::Create {
                    collection: collection.clone(),
                    rkey: rkey.clone(),
                    data,
                };
                (record, op)
            }
        };

        let data = record.cid()?;
        let (commit_cid, commit) = self.build_commit(&identity, op)?;

        self.store.put(&storage_key, &encode(&record)?).await?;
        self.put_commit(&commit_cid, &commit).await?;
        self.set_head(commit_cid).await?;

        debug!(%collection, %rkey, cid = %data, "updated record");
        Ok(data)
    }

    /// Delete a record, appending a tombstone commit.
    ///
    /// Fails with not-found if the record is absent; storage is unchanged in
    /// that case.
    pub async fn delete_record(&mut self, collection: &Nsid, rkey: &RecordKey) -> Result<()> {
        let identity = self.require_identity()?.clone();
        let storage_key = keys::record_key(collection, rkey);
        if self.store.get(&storage_key).await?.is_none() {
            return Err(RepoError::not_found(
                "record",
                format!("{}/{}", collection, rkey),
            ));
        }

        let op = CommitOp::Delete {
            collection: collection.clone(),
            rkey: rkey.clone(),
        };
        let (commit_cid, commit) = self.build_commit(&identity, op)?;

        self.put_commit(&commit_cid, &commit).await?;
        self.store.delete(&storage_key).await?;
        self.set_head(commit_cid).await?;

        debug!(%collection, %rkey, "deleted record");
        Ok(())
    }

    /// Fetch a single record, if present
    pub async fn get_record(
        &self,
        collection: &Nsid,
        rkey: &RecordKey,
    ) -> Result<Option<Record>> {
        match self.store.get(&keys::record_key(collection, rkey)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List all records in a collection, ordered by creation timestamp
    /// ascending with ties broken by key
    pub async fn list_records(&self, collection: &Nsid) -> Result<Vec<Record>> {
        let prefix = keys::collection_prefix(collection);
        let mut records = Vec::new();
        for key in self.store.list(&prefix).await? {
            if let Some(bytes) = self.store.get(&key).await? {
                records.push(decode::<Record>(&bytes)?);
            }
        }
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.rkey.cmp(&b.rkey))
        });
        Ok(records)
    }

    /// Walk the commit chain from genesis to head.
    ///
    /// Returns `(cid, commit)` pairs in chain order. Fails with an integrity
    /// error if a `prev` reference points at a missing commit or the chain
    /// loops.
    pub async fn commits(&self) -> Result<Vec<(IpldCid, Commit)>> {
        let mut chain = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut cursor = self.head;

        while let Some(cid) = cursor {
            if !seen.insert(cid) {
                return Err(RepoError::integrity(format!(
                    "commit chain loops at {}",
                    cid
                )));
            }
            let bytes = self
                .store
                .get(&keys::commit_key(&cid))
                .await?
                .ok_or_else(|| {
                    RepoError::integrity(format!("commit chain references missing commit {}", cid))
                })?;
            let commit: Commit = decode(&bytes)?;
            cursor = commit.prev;
            chain.push((cid, commit));
        }

        chain.reverse();
        Ok(chain)
    }

    /// Verify a commit's signature against this repository's public key
    pub fn verify_commit(&self, commit: &Commit) -> Result<bool> {
        let identity = self.require_identity()?;
        commit.verify(&self.crypto, identity.public_key())
    }

    /// Create a post in the append-only posts collection under a generated
    /// key, returning the key and the record CID
    pub async fn create_post(&mut self, value: &Value) -> Result<(RecordKey, IpldCid)> {
        let collection = Nsid::new(POSTS_COLLECTION)?;
        let rkey = RecordKey::generate();
        let cid = self.create_record(&collection, &rkey, value).await?;
        Ok((rkey, cid))
    }

    /// Merge changes into the profile singleton, creating it if absent
    pub async fn edit_profile(&mut self, value: &Value) -> Result<IpldCid> {
        let collection = Nsid::new(PROFILE_COLLECTION)?;
        let rkey = RecordKey::new(PROFILE_RKEY)?;
        self.update_record(&collection, &rkey, value).await
    }

    fn require_identity(&self) -> Result<&Identity> {
        self.identity
            .as_ref()
            .ok_or_else(|| RepoError::not_found("identity", "repository is not initialized"))
    }

    /// Build and sign a commit against the current head. Signing happens
    /// before any storage write so a signing failure leaves no partial state.
    fn build_commit(&self, identity: &Identity, op: CommitOp) -> Result<(IpldCid, Commit)> {
        let mut commit =
            Commit::new_unsigned(identity.did.clone(), op, self.head, self.clock.now());
        commit.sign(&self.crypto, &identity.keypair.secret)?;
        let cid = commit.cid()?;
        Ok((cid, commit))
    }

    async fn put_commit(&self, cid: &IpldCid, commit: &Commit) -> Result<()> {
        self.store
            .put(&keys::commit_key(cid), &encode(commit)?)
            .await
    }

    async fn set_head(&mut self, cid: IpldCid) -> Result<()> {
        self.store
            .put(keys::HEAD, cid.to_string().as_bytes())
            .await?;
        self.head = Some(cid);
        Ok(())
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(RepoError::serialization)
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(RepoError::serialization)
}

pub(crate) fn parse_head(bytes: &[u8]) -> Result<IpldCid> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| RepoError::validation("head pointer is not valid UTF-8"))?;
    IpldCid::try_from(text).map_err(|e| RepoError::validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ManualClock;
    use crate::storage::MemoryKvStore;
    use serde_json::json;

    async fn repo() -> Repository<MemoryKvStore, ManualClock> {
        Repository::open_with(MemoryKvStore::new(), ManualClock::new(1_000), Ed25519Crypto)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn init_identity_is_idempotent() {
        let mut repo = repo().await;
        assert_eq!(repo.get_did(), None);

        let alice = Did::new("did:plc:alice123").unwrap();
        assert_eq!(repo.init_identity(alice.clone()).await.unwrap(), alice);

        // a second call with a different DID returns the original
        let bob = Did::new("did:plc:bob456").unwrap();
        assert_eq!(repo.init_identity(bob).await.unwrap(), alice);
        assert_eq!(repo.get_did(), Some(&alice));
    }

    #[tokio::test]
    async fn genesis_commit_has_no_parent() {
        let mut repo = repo().await;
        repo.init_identity(Did::new("did:plc:alice123").unwrap())
            .await
            .unwrap();

        let chain = repo.commits().await.unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].1.prev, None);
        assert_eq!(chain[0].1.op, CommitOp::Init);
        assert_eq!(repo.head(), Some(&chain[0].0));
    }

    #[tokio::test]
    async fn mutation_requires_identity() {
        let mut repo = repo().await;
        let collection = Nsid::raw("app.bsky.feed.post");
        let rkey = RecordKey::raw("post1");

        let err = repo
            .create_record(&collection, &rkey, &json!({"text": "hello"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &crate::error::RepoErrorKind::NotFound);
    }

    #[tokio::test]
    async fn record_values_must_be_objects() {
        let mut repo = repo().await;
        repo.init_identity(Did::new("did:plc:alice123").unwrap())
            .await
            .unwrap();

        let err = repo
            .create_record(
                &Nsid::raw("app.bsky.feed.post"),
                &RecordKey::raw("post1"),
                &json!("just a string"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &crate::error::RepoErrorKind::Validation);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let mut repo = repo().await;
        repo.init_identity(Did::new("did:plc:alice123").unwrap())
            .await
            .unwrap();
        let collection = Nsid::raw("app.bsky.feed.post");
        let rkey = RecordKey::raw("post1");

        repo.create_record(&collection, &rkey, &json!({"text": "hello"}))
            .await
            .unwrap();
        let err = repo
            .create_record(&collection, &rkey, &json!({"text": "again"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &crate::error::RepoErrorKind::DuplicateKey);
    }

    #[tokio::test]
    async fn update_on_append_only_collection_fails() {
        let mut repo = repo().await;
        repo.init_identity(Did::new("did:plc:alice123").unwrap())
            .await
            .unwrap();
        let collection = Nsid::raw("app.bsky.feed.post");
        let rkey = RecordKey::raw("post1");

        let err = repo
            .update_record(&collection, &rkey, &json!({"text": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &crate::error::RepoErrorKind::NotFound);

        repo.create_record(&collection, &rkey, &json!({"text": "x"}))
            .await
            .unwrap();
        let err = repo
            .update_record(&collection, &rkey, &json!({"text": "y"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &crate::error::RepoErrorKind::DuplicateKey);
    }

    #[tokio::test]
    async fn profile_updates_merge() {
        let mut repo = repo().await;
        repo.init_identity(Did::new("did:plc:alice123").unwrap())
            .await
            .unwrap();

        repo.edit_profile(&json!({"displayName": "Alice", "description": "weaver"}))
            .await
            .unwrap();
        repo.edit_profile(&json!({"displayName": "Alice B.", "description": "weaver"}))
            .await
            .unwrap();

        let collection = Nsid::raw(PROFILE_COLLECTION);
        let rkey = RecordKey::raw(PROFILE_RKEY);
        let record = repo.get_record(&collection, &rkey).await.unwrap().unwrap();
        assert_eq!(record.value["displayName"], "Alice B.");
        assert_eq!(record.value["description"], "weaver");
        assert!(record.doc.is_some());
    }

    #[tokio::test]
    async fn list_orders_by_timestamp_then_key() {
        let mut repo = repo().await;
        repo.init_identity(Did::new("did:plc:alice123").unwrap())
            .await
            .unwrap();
        let collection = Nsid::raw("app.bsky.feed.post");

        repo.create_record(&collection, &RecordKey::raw("b"), &json!({"n": 1}))
            .await
            .unwrap();
        repo.clock.advance(10);
        repo.create_record(&collection, &RecordKey::raw("a"), &json!({"n": 2}))
            .await
            .unwrap();
        // same timestamp as "a": key breaks the tie
        repo.create_record(&collection, &RecordKey::raw("c"), &json!({"n": 3}))
            .await
            .unwrap();

        let keys: Vec<_> = repo
            .list_records(&collection)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.rkey.to_string())
            .collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn delete_missing_record_leaves_storage_unchanged() {
        let mut repo = repo().await;
        repo.init_identity(Did::new("did:plc:alice123").unwrap())
            .await
            .unwrap();
        let head_before = repo.head().copied();
        let commits_before = repo.commits().await.unwrap().len();

        let err = repo
            .delete_record(&Nsid::raw("app.bsky.feed.post"), &RecordKey::raw("nope"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &crate::error::RepoErrorKind::NotFound);
        assert_eq!(repo.head().copied(), head_before);
        assert_eq!(repo.commits().await.unwrap().len(), commits_before);
    }

    #[tokio::test]
    async fn chain_walk_visits_every_commit_once() {
        let mut repo = repo().await;
        repo.init_identity(Did::new("did:plc:alice123").unwrap())
            .await
            .unwrap();
        let collection = Nsid::raw("app.bsky.feed.post");

        repo.create_record(&collection, &RecordKey::raw("p1"), &json!({"n": 1}))
            .await
            .unwrap();
        repo.create_record(&collection, &RecordKey::raw("p2"), &json!({"n": 2}))
            .await
            .unwrap();
        repo.delete_record(&collection, &RecordKey::raw("p1"))
            .await
            .unwrap();

        let chain = repo.commits().await.unwrap();
        assert_eq!(chain.len(), 4);
        assert_eq!(chain[0].1.prev, None);
        for pair in chain.windows(2) {
            assert_eq!(pair[1].1.prev, Some(pair[0].0));
        }
        assert_eq!(repo.head(), Some(&chain[3].0));

        // every commit signature verifies against the repository key
        for (_, commit) in &chain {
            assert!(repo.verify_commit(commit).unwrap());
        }
    }

    #[tokio::test]
    async fn reopen_hydrates_identity_and_head() {
        let store = MemoryKvStore::new();
        let mut repo =
            Repository::open_with(store.clone(), ManualClock::new(1_000), Ed25519Crypto)
                .await
                .unwrap();
        let did = Did::new("did:plc:alice123").unwrap();
        repo.init_identity(did.clone()).await.unwrap();
        repo.create_post(&json!({"text": "hello"})).await.unwrap();
        let head = repo.head().copied();

        let reopened = Repository::open_with(store, ManualClock::new(2_000), Ed25519Crypto)
            .await
            .unwrap();
        assert_eq!(reopened.get_did(), Some(&did));
        assert_eq!(reopened.head().copied(), head);
    }

    #[tokio::test]
    async fn create_post_returns_listable_record() {
        let mut repo = repo().await;
        repo.init_identity(Did::new("did:plc:alice123").unwrap())
            .await
            .unwrap();

        let (rkey, cid) = repo.create_post(&json!({"text": "hello"})).await.unwrap();
        let records = repo
            .list_records(&Nsid::raw(POSTS_COLLECTION))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rkey, rkey);
        assert_eq!(records[0].value["text"], "hello");
        assert_eq!(records[0].cid().unwrap(), cid);
    }
}
