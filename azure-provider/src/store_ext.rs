//! [`common_lib::store::Store::update`] takes a synchronous mutator, but
//! the pipelines and scanner need to run cloud calls before deciding what
//! to persist. `update_async` generalises the same read-mutate-write shape
//! across an `async` mutator: read the row, let the caller drive pipeline
//! steps against an owned copy, then persist.
//!
//! This trades the row-scoped serialisation `Store::update` guarantees for
//! the weaker "exactly one scanner pass touches a given worker at a time"
//! guarantee SPEC_FULL.md §5 actually asks for (workers are never
//! processed concurrently by two passes in the first place).

use common_lib::store::{Store, StorableObject};
use common_lib::error::StoreError;

pub async fn update_async<S, O, F, Fut>(store: &S, key: &O::Key, mutator: F) -> Result<O, StoreError>
where
    S: Store,
    O: StorableObject,
    F: FnOnce(O) -> Fut,
    Fut: std::future::Future<Output = O>,
{
    let object = store.get_obj(key).await?;
    let updated = mutator(object).await;
    store.put_obj(&updated).await?;
    Ok(updated)
}
