//! Azure Resource Manager REST client: bearer-token auth, PUT/GET/DELETE
//! against `management.azure.com`, classification of the response into the
//! Gateway's error taxonomy. Grounded on the shape of a generic Azure ARM
//! client: one `handle_response` helper shared by every verb, methods
//! thin wrappers naming the ARM resource type and HTTP verb.

pub mod models;
pub mod operation;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use common_lib::types::{OperationHandle, OperationMethod};

use crate::config::ProviderConfig;
use crate::error::GatewayError;
use crate::gateway::{Bucket, Gateway};
use models::{
    InstanceView, NetworkInterface, NetworkInterfaceProperties, PublicIpAddress, PublicIpProperties,
    VirtualMachine,
};

const COMPUTE_API_VERSION: &str = "2021-11-01";
const NETWORK_API_VERSION: &str = "2021-05-01";
const MANAGEMENT_BASE: &str = "https://management.azure.com";
const AAD_LOGIN_BASE: &str = "https://login.microsoftonline.com";

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Authenticated Azure ARM client plus the rate-limited gateway every call
/// flows through.
pub struct ArmClient {
    http: Client,
    gateway: Arc<Gateway>,
    config: ProviderConfig,
    token: Mutex<Option<CachedToken>>,
    management_base: String,
    aad_login_base: String,
}

impl ArmClient {
    pub fn new(config: ProviderConfig, gateway: Arc<Gateway>) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| GatewayError::Transport { source })?;
        Ok(Self {
            http,
            gateway,
            config,
            token: Mutex::new(None),
            management_base: MANAGEMENT_BASE.to_string(),
            aad_login_base: AAD_LOGIN_BASE.to_string(),
        })
    }

    /// Point this client at a different ARM/AAD endpoint, e.g. a local
    /// `wiremock` server standing in for `management.azure.com` in tests.
    pub fn with_bases(mut self, management_base: impl Into<String>, aad_login_base: impl Into<String>) -> Self {
        self.management_base = management_base.into();
        self.aad_login_base = aad_login_base.into();
        self
    }

    fn arm_base(&self) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers",
            self.management_base, self.config.subscription_id, self.config.resource_group_name
        )
    }

    /// Fetch (and cache) an AAD client-credentials bearer token.
    async fn bearer_token(&self) -> Result<String, GatewayError> {
        {
            let guard = self.token.lock();
            if let Some(cached) = guard.as_ref() {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.token.clone());
                }
            }
        }

        #[derive(serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
            #[serde(default)]
            expires_in: Option<String>,
        }

        let url = format!("{}/{}/oauth2/token", self.aad_login_base, self.config.domain);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.secret),
            ("resource", self.management_base.as_str()),
        ];
        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|source| GatewayError::Transport { source })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| GatewayError::Transport { source })?;
        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }
        let parsed: TokenResponse =
            serde_json::from_str(&text).map_err(|source| GatewayError::Decode { source })?;
        let ttl = parsed
            .expires_in
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(3600);
        let expires_at = Instant::now() + Duration::from_secs(ttl.saturating_sub(60));
        *self.token.lock() = Some(CachedToken {
            token: parsed.access_token.clone(),
            expires_at,
        });
        Ok(parsed.access_token)
    }

    pub(crate) async fn get_raw(&self, url: &str) -> Result<String, GatewayError> {
        let token = self.bearer_token().await?;
        debug!(%url, "GET");
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| GatewayError::Transport { source })?;
        Self::read_body(response).await
    }

    /// Surface a `Retry-After` header for telemetry only; SPEC_FULL.md §9.1
    /// keeps backoff entirely derived from the Gateway's own classification,
    /// so this never feeds back into retry timing.
    fn log_retry_after(status: StatusCode, headers: &reqwest::header::HeaderMap) {
        if let Some(value) = headers.get(reqwest::header::RETRY_AFTER).and_then(|v| v.to_str().ok()) {
            debug!(%status, retry_after = %value, "server sent Retry-After (informational only)");
        }
    }

    async fn read_body(response: reqwest::Response) -> Result<String, GatewayError> {
        let status = response.status();
        Self::log_retry_after(status, response.headers());
        let text = response
            .text()
            .await
            .map_err(|source| GatewayError::Transport { source })?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(GatewayError::Rejected {
                status: status.as_u16(),
                body: text,
            })
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, GatewayError> {
        let text = self.get_raw(url).await?;
        serde_json::from_str(&text).map_err(|source| GatewayError::Decode { source })
    }

    /// `PUT` a create-or-update request; returns the async-operation URL
    /// from the `Azure-AsyncOperation` header if one was given, alongside
    /// the (possibly incomplete) body.
    async fn put<B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<(String, Option<String>), GatewayError> {
        let token = self.bearer_token().await?;
        debug!(%url, "PUT");
        let response = self
            .http
            .put(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|source| GatewayError::Transport { source })?;
        let status = response.status();
        Self::log_retry_after(status, response.headers());
        let op_url = response
            .headers()
            .get("Azure-AsyncOperation")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response
            .text()
            .await
            .map_err(|source| GatewayError::Transport { source })?;
        if status.is_success() || status == StatusCode::CREATED || status == StatusCode::ACCEPTED {
            Ok((text, op_url))
        } else {
            Err(GatewayError::Rejected {
                status: status.as_u16(),
                body: text,
            })
        }
    }

    /// `DELETE`; returns the async-operation URL if one was given. 404 is
    /// treated as success (already gone).
    async fn delete(&self, url: &str) -> Result<Option<String>, GatewayError> {
        let token = self.bearer_token().await?;
        debug!(%url, "DELETE");
        let response = self
            .http
            .delete(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| GatewayError::Transport { source })?;
        let status = response.status();
        Self::log_retry_after(status, response.headers());
        let op_url = response
            .headers()
            .get("Azure-AsyncOperation")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if status.is_success() || status == StatusCode::ACCEPTED || status == StatusCode::NOT_FOUND {
            Ok(op_url)
        } else {
            let text = response
                .text()
                .await
                .map_err(|source| GatewayError::Transport { source })?;
            Err(GatewayError::Rejected {
                status: status.as_u16(),
                body: text,
            })
        }
    }

    fn make_operation(url: Option<String>, method: OperationMethod) -> Option<OperationHandle> {
        url.and_then(|u| url::Url::parse(&u).ok())
            .map(|url| OperationHandle { url, method })
    }

    // -- Public IP addresses -----------------------------------------

    pub async fn get_public_ip(&self, name: &str) -> Result<PublicIpAddress, GatewayError> {
        let url = format!(
            "{}/Microsoft.Network/publicIPAddresses/{name}?api-version={NETWORK_API_VERSION}",
            self.arm_base()
        );
        self.gateway.enqueue(Bucket::Get, || self.get_json(&url)).await
    }

    pub async fn begin_create_public_ip(
        &self,
        name: &str,
        location: &str,
        tags: std::collections::BTreeMap<String, String>,
    ) -> Result<Option<OperationHandle>, GatewayError> {
        let url = format!(
            "{}/Microsoft.Network/publicIPAddresses/{name}?api-version={NETWORK_API_VERSION}",
            self.arm_base()
        );
        let body = PublicIpAddress {
            id: None,
            name: name.to_string(),
            location: Some(location.to_string()),
            tags,
            properties: PublicIpProperties {
                public_ip_allocation_method: Some("Dynamic".to_string()),
                provisioning_state: None,
            },
        };
        let (_body, op_url) = self
            .gateway
            .enqueue(Bucket::Query, || self.put(&url, &body))
            .await?;
        Ok(Self::make_operation(op_url, OperationMethod::Create))
    }

    pub async fn begin_delete_public_ip(
        &self,
        name: &str,
    ) -> Result<Option<OperationHandle>, GatewayError> {
        let url = format!(
            "{}/Microsoft.Network/publicIPAddresses/{name}?api-version={NETWORK_API_VERSION}",
            self.arm_base()
        );
        let op_url = self.gateway.enqueue(Bucket::Query, || self.delete(&url)).await?;
        Ok(Self::make_operation(op_url, OperationMethod::Delete))
    }

    // -- Network interfaces -------------------------------------------

    pub async fn get_network_interface(&self, name: &str) -> Result<NetworkInterface, GatewayError> {
        let url = format!(
            "{}/Microsoft.Network/networkInterfaces/{name}?api-version={NETWORK_API_VERSION}",
            self.arm_base()
        );
        self.gateway.enqueue(Bucket::Get, || self.get_json(&url)).await
    }

    pub async fn begin_create_network_interface(
        &self,
        name: &str,
        properties: NetworkInterfaceProperties,
        location: &str,
        tags: std::collections::BTreeMap<String, String>,
    ) -> Result<Option<OperationHandle>, GatewayError> {
        let url = format!(
            "{}/Microsoft.Network/networkInterfaces/{name}?api-version={NETWORK_API_VERSION}",
            self.arm_base()
        );
        let body = NetworkInterface {
            id: None,
            name: name.to_string(),
            location: Some(location.to_string()),
            tags,
            properties,
        };
        let (_body, op_url) = self
            .gateway
            .enqueue(Bucket::Query, || self.put(&url, &body))
            .await?;
        Ok(Self::make_operation(op_url, OperationMethod::Create))
    }

    pub async fn begin_delete_network_interface(
        &self,
        name: &str,
    ) -> Result<Option<OperationHandle>, GatewayError> {
        let url = format!(
            "{}/Microsoft.Network/networkInterfaces/{name}?api-version={NETWORK_API_VERSION}",
            self.arm_base()
        );
        let op_url = self.gateway.enqueue(Bucket::Query, || self.delete(&url)).await?;
        Ok(Self::make_operation(op_url, OperationMethod::Delete))
    }

    // -- Virtual machines ----------------------------------------------

    pub async fn get_virtual_machine(&self, name: &str) -> Result<VirtualMachine, GatewayError> {
        let url = format!(
            "{}/Microsoft.Compute/virtualMachines/{name}?api-version={COMPUTE_API_VERSION}",
            self.arm_base()
        );
        self.gateway.enqueue(Bucket::Get, || self.get_json(&url)).await
    }

    pub async fn get_virtual_machine_instance_view(
        &self,
        name: &str,
    ) -> Result<InstanceView, GatewayError> {
        let url = format!(
            "{}/Microsoft.Compute/virtualMachines/{name}/instanceView?api-version={COMPUTE_API_VERSION}",
            self.arm_base()
        );
        self.gateway.enqueue(Bucket::Get, || self.get_json(&url)).await
    }

    pub async fn begin_create_virtual_machine(
        &self,
        name: &str,
        config: serde_json::Value,
    ) -> Result<Option<OperationHandle>, GatewayError> {
        let url = format!(
            "{}/Microsoft.Compute/virtualMachines/{name}?api-version={COMPUTE_API_VERSION}",
            self.arm_base()
        );
        let (_body, op_url) = self
            .gateway
            .enqueue(Bucket::Query, || self.put(&url, &config))
            .await?;
        Ok(Self::make_operation(op_url, OperationMethod::Create))
    }

    pub async fn begin_delete_virtual_machine(
        &self,
        name: &str,
    ) -> Result<Option<OperationHandle>, GatewayError> {
        let url = format!(
            "{}/Microsoft.Compute/virtualMachines/{name}?api-version={COMPUTE_API_VERSION}",
            self.arm_base()
        );
        let op_url = self.gateway.enqueue(Bucket::Query, || self.delete(&url)).await?;
        Ok(Self::make_operation(op_url, OperationMethod::Delete))
    }

    // -- Managed disks ---------------------------------------------------

    pub async fn get_disk(&self, name: &str) -> Result<models::ArmResource<serde_json::Value>, GatewayError> {
        let url = format!(
            "{}/Microsoft.Compute/disks/{name}?api-version={COMPUTE_API_VERSION}",
            self.arm_base()
        );
        self.gateway.enqueue(Bucket::Get, || self.get_json(&url)).await
    }

    pub async fn begin_delete_disk(&self, name: &str) -> Result<Option<OperationHandle>, GatewayError> {
        let url = format!(
            "{}/Microsoft.Compute/disks/{name}?api-version={COMPUTE_API_VERSION}",
            self.arm_base()
        );
        let op_url = self.gateway.enqueue(Bucket::Query, || self.delete(&url)).await?;
        Ok(Self::make_operation(op_url, OperationMethod::Delete))
    }
}

/// `customData` payload consumed by the worker at boot (SPEC_FULL.md §4.4),
/// base64(UTF-8 JSON)-encoded before being set on the VM create request.
pub fn encode_custom_data(payload: &serde_json::Value) -> String {
    base64::encode(payload.to_string())
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
