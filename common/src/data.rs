use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    canonical,
    crypto::Hash,
    time::TimestampMillis,
};

#[derive(Debug, Error)]
pub enum DataError {
    #[error("A data element carries either an inline value or a blob reference, not both")]
    ValueAndBlob,

    #[error("A data element must carry an inline value or a blob reference")]
    Empty,

    #[error("Data element is not hashed yet")]
    NotHashed,

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

// Reference to an off-node binary payload, addressed by hash.
// The content itself lives with the data exchange; `public_ref` is set once
// the blob has also been published to shared storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub hash: Hash,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ref: Option<String>,
}

// The (id, hash) pair messages embed to reference their data
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRef {
    pub id: Uuid,
    pub hash: Hash,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Data {
    pub id: Uuid,
    pub namespace: String,
    pub created: TimestampMillis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<Hash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<BlobRef>,
}

impl Data {
    pub fn new_value(namespace: String, value: Value, created: TimestampMillis) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace,
            created,
            hash: None,
            value: Some(value),
            blob: None,
        }
    }

    pub fn new_blob(namespace: String, blob: BlobRef, created: TimestampMillis) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace,
            created,
            hash: None,
            value: None,
            blob: Some(blob),
        }
    }

    // Value and blob are mutually exclusive, the hash is derived from
    // whichever is present
    pub fn compute_hash(&self) -> Result<Hash, DataError> {
        match (&self.value, &self.blob) {
            (Some(value), None) => Ok(canonical::canonical_hash(value)?),
            (None, Some(blob)) => Ok(blob.hash.clone()),
            (Some(_), Some(_)) => Err(DataError::ValueAndBlob),
            (None, None) => Err(DataError::Empty),
        }
    }

    pub fn seal(&mut self) -> Result<(), DataError> {
        self.hash = Some(self.compute_hash()?);
        Ok(())
    }

    pub fn as_ref(&self) -> Result<DataRef, DataError> {
        Ok(DataRef {
            id: self.id,
            hash: self.hash.clone().ok_or(DataError::NotHashed)?,
        })
    }
}

// Local availability of a blob payload, recorded when the data exchange
// signals reception
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub hash: Hash,
    pub size: u64,
    pub received: TimestampMillis,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_hash_is_canonical() {
        let mut data = Data::new_value("ns1".into(), json!({"b": 2, "a": 1}), 1);
        data.seal().unwrap();
        let expected = crate::crypto::hash(br#"{"a":1,"b":2}"#);
        assert_eq!(data.hash, Some(expected));
    }

    #[test]
    fn test_blob_hash_is_blob_content_hash() {
        let blob_hash = crate::crypto::hash(b"blob-bytes");
        let mut data = Data::new_blob(
            "ns1".into(),
            BlobRef {
                hash: blob_hash.clone(),
                size: 10,
                public_ref: None,
            },
            1,
        );
        data.seal().unwrap();
        assert_eq!(data.hash, Some(blob_hash));
    }

    #[test]
    fn test_value_and_blob_rejected() {
        let mut data = Data::new_value("ns1".into(), json!(1), 1);
        data.blob = Some(BlobRef {
            hash: Hash::zero(),
            size: 0,
            public_ref: None,
        });
        assert!(matches!(data.seal(), Err(DataError::ValueAndBlob)));
    }
}
