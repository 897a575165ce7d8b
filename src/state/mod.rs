//! Durable key-value storage for progress, the sync queue and downloaded
//! content records.
//!
//! Every record lives under a single key and is written whole, so the only
//! atomicity the callers rely on is single-key atomicity.

pub mod db;
pub mod error;
pub mod memory;
pub mod schema;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use db::SqliteKvStore;
pub use error::StateError;
pub use memory::MemoryKvStore;

/// Get/set/delete over string keys and values.
///
/// Object-safe so it can be shared as `Arc<dyn KeyValueStore>`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StateError>;

    /// Remove a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StateError>;
}

/// Read and decode a JSON record.
pub async fn load_json<T: DeserializeOwned>(
    kv: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StateError> {
    match kv.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StateError::Serialization {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode and write a JSON record.
pub async fn save_json<T: Serialize + ?Sized>(
    kv: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StateError> {
    let raw = serde_json::to_string(value).map_err(|source| StateError::Serialization {
        key: key.to_string(),
        source,
    })?;
    kv.set(key, &raw).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let kv = MemoryKvStore::new();
        assert!(load_json::<Record>(&kv, "r").await.unwrap().is_none());

        let record = Record {
            name: "abc".into(),
            count: 3,
        };
        save_json(&kv, "r", &record).await.unwrap();
        assert_eq!(load_json::<Record>(&kv, "r").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_load_corrupt_record() {
        let kv = MemoryKvStore::new();
        kv.set("r", "{not json").await.unwrap();
        let err = load_json::<Record>(&kv, "r").await.unwrap_err();
        assert!(matches!(err, StateError::Serialization { ref key, .. } if key == "r"));
    }
}
