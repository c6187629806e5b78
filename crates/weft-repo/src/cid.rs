//! CID computation over canonical byte encodings
//!
//! A CID addresses a value by the SHA-256 digest of its canonical DAG-CBOR
//! encoding. Structurally equal values always yield the same CID, which is
//! what makes re-import idempotent and commit chains verifiable.

use crate::error::{RepoError, Result};
use ::cid::Cid as IpldCid;
use sha2::{Digest, Sha256};

/// DAG-CBOR codec identifier (0x71)
pub const DAG_CBOR: u64 = 0x71;
/// SHA2-256 multihash code (0x12)
pub const SHA2_256: u64 = 0x12;

/// Compute CID from raw bytes
///
/// Uses SHA-256 hash and DAG-CBOR codec. Assumes data is already DAG-CBOR
/// encoded.
pub fn compute_cid(data: &[u8]) -> Result<IpldCid> {
    let mut sha = Sha256::new();
    sha.update(data);
    let hash = sha.finalize().to_vec();
    let mh = multihash::Multihash::<64>::wrap(SHA2_256, hash.as_slice())
        .map_err(|e| RepoError::validation(e.to_string()))?;

    Ok(IpldCid::new_v1(DAG_CBOR, mh))
}

/// Serialize a value to its canonical DAG-CBOR byte encoding
///
/// JSON object keys iterate in sorted order, so the encoding is deterministic
/// for structurally equal values.
pub fn canonical_bytes<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_ipld_dagcbor::to_vec(value).map_err(RepoError::serialization)
}

/// Compute the CID of a JSON value from its canonical encoding
pub fn value_cid(value: &serde_json::Value) -> Result<IpldCid> {
    compute_cid(&canonical_bytes(value)?)
}

/// Serde helper serializing a [`IpldCid`] as its base32 string form
pub(crate) mod cid_serde {
    use ::cid::Cid as IpldCid;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(cid: &IpldCid, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&cid.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<IpldCid, D::Error> {
        let value = String::deserialize(deserializer)?;
        IpldCid::try_from(value.as_str()).map_err(D::Error::custom)
    }
}

/// Serde helper for `Option<IpldCid>` as an optional base32 string
pub(crate) mod cid_serde_opt {
    use ::cid::Cid as IpldCid;
    use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};

    pub fn serialize<S: Serializer>(
        cid: &Option<IpldCid>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        cid.map(|c| c.to_string()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<IpldCid>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(value) => IpldCid::try_from(value.as_str())
                .map(Some)
                .map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}
