//! Trait definitions for the persistent object store, in the shape the
//! teacher's `etcd.rs` backend implements (`put_obj`/`get_obj`/...), kept
//! deliberately small: object-level identity plus key-scoped
//! read-modify-write.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::StoreError;

/// A string key uniquely identifying one stored object of some type.
pub trait ObjectKey: Send + Sync {
    /// The flat string used as the store's actual key, e.g.
    /// `worker-pool/<poolId>` or `worker/<poolId>/<workerId>`.
    fn key(&self) -> String;
}

/// A type that can be persisted keyed by an [`ObjectKey`].
pub trait StorableObject: Serialize + DeserializeOwned + Send + Sync + Clone {
    type Key: ObjectKey;

    /// Compute this object's key from its own fields.
    fn object_key(&self) -> Self::Key;
}

/// The persistent store the reconciliation engine is programmed against.
///
/// All pipeline progress is persisted *before* the next cloud call whose
/// correctness depends on that state (SPEC_FULL.md §4.2) — callers must
/// `await` every `put_obj`/`update` before issuing the dependent cloud
/// call, the trait itself cannot enforce that ordering.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or overwrite an object.
    async fn put_obj<O: StorableObject>(&self, object: &O) -> Result<(), StoreError>;

    /// Fetch an object by key.
    async fn get_obj<O: StorableObject>(&self, key: &O::Key) -> Result<O, StoreError>;

    /// Delete an object by key. Deleting an absent key is not an error.
    async fn delete_obj<O: StorableObject>(&self, key: &O::Key) -> Result<(), StoreError>;

    /// List every stored object whose key starts with `prefix`.
    async fn list_prefix<O: StorableObject>(&self, prefix: &str) -> Result<Vec<O>, StoreError>;

    /// Read-modify-write under a row-scoped lock: concurrent `update`s
    /// against the same key serialise (SPEC_FULL.md §4.2, §5).
    ///
    /// `mutator` returning `Err` aborts the transaction without persisting
    /// any change.
    async fn update<O, F, E>(&self, key: &O::Key, mutator: F) -> Result<Result<O, E>, StoreError>
    where
        O: StorableObject,
        F: FnOnce(&mut O) -> Result<(), E> + Send;
}
