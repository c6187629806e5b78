//! Stored records
//!
//! A record is a JSON value addressed by `(collection, rkey)`. Records in
//! mutable collections additionally carry the serialized change history of
//! their backing [`crate::Document`], so merge behavior survives persistence
//! and export/restore.

use crate::cid::value_cid;
use crate::error::Result;
use ::cid::Cid as IpldCid;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_common::{Nsid, RecordKey};

/// A record stored in the repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Collection the record belongs to
    pub collection: Nsid,
    /// Record key within the collection
    pub rkey: RecordKey,
    /// Materialized record value
    pub value: Value,
    /// Serialized document history, present only for mutable collections
    #[serde(default, with = "base64_bytes_opt", skip_serializing_if = "Option::is_none")]
    pub doc: Option<Bytes>,
    /// Creation timestamp, milliseconds since the Unix epoch
    pub created_at: i64,
}

impl Record {
    /// CID of the record value.
    ///
    /// Covers only `value`, never the document history or timestamps, so two
    /// records with equal materialized state share a CID.
    pub fn cid(&self) -> Result<IpldCid> {
        value_cid(&self.value)
    }
}

/// Serde helper serializing `Option<Bytes>` as a base64 string
pub(crate) mod base64_bytes_opt {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Bytes>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Bytes>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(value) => STANDARD
                .decode(&value)
                .map(Bytes::from)
                .map(Some)
                .map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}
