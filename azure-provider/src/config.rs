//! Provider startup configuration (SPEC_FULL.md §6 "Provider config").
//!
//! Loaded from a JSON file named on the CLI plus environment overrides, the
//! way the teacher threads `structopt`-derived flags straight through to
//! `Context` construction in `server.rs`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use structopt::StructOpt;

/// Per-provider rate-limit overrides (SPEC_FULL.md §4.1); absent buckets
/// fall back to the gateway's built-in defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub query: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub get: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub list: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub op_read: Option<u32>,
}

/// The persisted provider config (SPEC_FULL.md §6), loaded once at
/// startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub client_id: String,
    pub secret: String,
    pub domain: String,
    pub subscription_id: String,
    pub resource_group_name: String,
    pub storage_account_name: String,
    /// The control plane's own externally reachable URL, embedded in a
    /// worker's `customData` so it knows where to call back for
    /// registration (SPEC_FULL.md §4.4).
    pub root_url: String,
    #[serde(default)]
    pub api_rate_limits: RateLimits,
    /// Base backoff delay, in milliseconds, that the classifier in
    /// SPEC_FULL.md §4.1 multiplies.
    #[serde(default = "default_backoff_delay_ms")]
    pub backoff_delay_ms: u64,
    /// Directory of PEM-encoded Microsoft intermediate CA certificates
    /// pinned for registration verification (SPEC_FULL.md §4.8).
    pub ca_directory: PathBuf,
}

fn default_backoff_delay_ms() -> u64 {
    1_000
}

impl ProviderConfig {
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::error::Error> {
        let text = std::fs::read_to_string(path).map_err(|e| crate::error::Error::Config {
            reason: format!("reading {}: {e}", path.display()),
        })?;
        serde_json::from_str(&text).map_err(|e| crate::error::Error::Config {
            reason: format!("parsing {}: {e}", path.display()),
        })
    }
}

/// Process entrypoint flags, in the shape of the teacher's `CliArgs`
/// (`control-plane/agents/core/src/server.rs`): named, documented,
/// `humantime`-typed durations.
#[derive(Debug, StructOpt)]
#[structopt(name = "azure-provider", about = "Azure worker provisioning control plane")]
pub struct CliArgs {
    /// Path to the provider config JSON file (SPEC_FULL.md §6).
    #[structopt(long, parse(from_os_str))]
    pub config: PathBuf,

    /// How often the scanning loop runs `checkWorker` over every worker.
    #[structopt(long, default_value = "10s")]
    pub reconcile_period: humantime::Duration,

    /// How often the provisioning loop samples pool capacity and calls
    /// `provision`.
    #[structopt(long, default_value = "30s")]
    pub provision_period: humantime::Duration,

    /// Maximum concurrent workers processed per scan pass
    /// (SPEC_FULL.md §4.7.1).
    #[structopt(long, default_value = "32")]
    pub scan_concurrency: usize,

    /// Optional Jaeger collector endpoint for OpenTelemetry export,
    /// matching the teacher's optional `--jaeger` flag.
    #[structopt(long)]
    pub jaeger: Option<String>,
}
