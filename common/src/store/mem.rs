//! In-memory [`Store`] implementation. This is what scenario tests and the
//! scanner/pipeline unit tests run against; the real system would plug in
//! an external store (e.g. the feature-gated [`super::etcd`] adapter)
//! behind the same trait.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use snafu::ResultExt;
use tokio::sync::{Mutex, RwLock};

use super::definitions::{ObjectKey, StorableObject, Store};
use crate::error::{self, StoreError};

/// Row-locked, process-local object store.
#[derive(Default)]
pub struct MemStore {
    data: RwLock<HashMap<String, Value>>,
    row_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn row_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.row_locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn put_obj<O: StorableObject>(&self, object: &O) -> Result<(), StoreError> {
        let key = object.object_key().key();
        let value = serde_json::to_value(object).context(error::SerialiseValue)?;
        self.data.write().await.insert(key, value);
        Ok(())
    }

    async fn get_obj<O: StorableObject>(&self, key: &O::Key) -> Result<O, StoreError> {
        let k = key.key();
        let data = self.data.read().await;
        let value = data
            .get(&k)
            .cloned()
            .ok_or_else(|| StoreError::MissingEntry { key: k.clone() })?;
        serde_json::from_value(value).context(error::DeserialiseValue { value: k })
    }

    async fn delete_obj<O: StorableObject>(&self, key: &O::Key) -> Result<(), StoreError> {
        self.data.write().await.remove(&key.key());
        Ok(())
    }

    async fn list_prefix<O: StorableObject>(&self, prefix: &str) -> Result<Vec<O>, StoreError> {
        let data = self.data.read().await;
        data.iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| {
                serde_json::from_value(v.clone()).context(error::DeserialiseValue {
                    value: k.to_string(),
                })
            })
            .collect()
    }

    async fn update<O, F, E>(&self, key: &O::Key, mutator: F) -> Result<Result<O, E>, StoreError>
    where
        O: StorableObject,
        F: FnOnce(&mut O) -> Result<(), E> + Send,
    {
        let k = key.key();
        let lock = self.row_lock(&k).await;
        let _guard = lock.lock().await;

        let mut obj: O = self.get_obj(key).await?;
        match mutator(&mut obj) {
            Ok(()) => {
                self.put_obj(&obj).await?;
                Ok(Ok(obj))
            }
            Err(e) => Ok(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    struct Dummy {
        id: String,
        count: u32,
    }

    struct DummyKey(String);
    impl ObjectKey for DummyKey {
        fn key(&self) -> String {
            format!("dummy/{}", self.0)
        }
    }
    impl StorableObject for Dummy {
        type Key = DummyKey;
        fn object_key(&self) -> Self::Key {
            DummyKey(self.id.clone())
        }
    }

    #[tokio::test]
    async fn put_get_roundtrip() {
        let store = MemStore::new();
        let dummy = Dummy {
            id: "a".into(),
            count: 1,
        };
        store.put_obj(&dummy).await.unwrap();
        let back: Dummy = store.get_obj(&DummyKey("a".into())).await.unwrap();
        assert_eq!(back, dummy);
    }

    #[tokio::test]
    async fn missing_key_errors() {
        let store = MemStore::new();
        let result: Result<Dummy, _> = store.get_obj(&DummyKey("missing".into())).await;
        assert!(matches!(result, Err(StoreError::MissingEntry { .. })));
    }

    #[tokio::test]
    async fn update_mutates_and_persists() {
        let store = MemStore::new();
        let dummy = Dummy {
            id: "a".into(),
            count: 1,
        };
        store.put_obj(&dummy).await.unwrap();

        let updated = store
            .update::<Dummy, _, ()>(&DummyKey("a".into()), |d| {
                d.count += 1;
                Ok(())
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.count, 2);

        let back: Dummy = store.get_obj(&DummyKey("a".into())).await.unwrap();
        assert_eq!(back.count, 2);
    }

    #[tokio::test]
    async fn list_prefix_filters() {
        let store = MemStore::new();
        store
            .put_obj(&Dummy {
                id: "a".into(),
                count: 1,
            })
            .await
            .unwrap();
        store
            .put_obj(&Dummy {
                id: "b".into(),
                count: 2,
            })
            .await
            .unwrap();

        let all: Vec<Dummy> = store.list_prefix("dummy/").await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
