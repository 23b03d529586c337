//! The process-wide injected context (SPEC_FULL.md GLOSSARY "Context"):
//! Gateway, Store, Estimator, NotifyHook and CA store handles, constructed
//! once at startup and threaded through every task, the way the teacher
//! builds its `Registry` in `server.rs` and never reaches for process-
//! global state from inside the reconciler.
//!
//! `Store`'s `put_obj`/`get_obj`/... are generic over the stored type, so
//! it cannot be boxed as `dyn Store` (SPEC_FULL.md §4.2.1); `Context` is
//! instead generic over the concrete backend.

use std::sync::Arc;

use common_lib::store::Store;

use crate::client::ArmClient;
use crate::config::ProviderConfig;
use crate::estimator::Estimator;
use crate::gateway::Gateway;
use crate::notify::NotifyHook;
use crate::registration::CaStore;

pub struct Context<S: Store> {
    pub store: Arc<S>,
    pub client: Arc<ArmClient>,
    pub gateway: Arc<Gateway>,
    pub estimator: Arc<dyn Estimator>,
    pub notify: Arc<dyn NotifyHook>,
    pub ca_store: Arc<CaStore>,
    pub config: ProviderConfig,
}

impl<S: Store> Context<S> {
    pub fn new(
        store: Arc<S>,
        config: ProviderConfig,
        estimator: Arc<dyn Estimator>,
        notify: Arc<dyn NotifyHook>,
        ca_store: Arc<CaStore>,
    ) -> Result<Self, crate::error::Error> {
        let gateway = Arc::new(Gateway::new(
            &config.api_rate_limits,
            std::time::Duration::from_millis(config.backoff_delay_ms),
        ));
        let client = Arc::new(
            ArmClient::new(config.clone(), gateway.clone())
                .map_err(|source| crate::error::Error::Gateway { source })?,
        );
        Ok(Self {
            store,
            client,
            gateway,
            estimator,
            notify,
            ca_store,
            config,
        })
    }
}
