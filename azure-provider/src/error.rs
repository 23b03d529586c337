//! The error taxonomy of SPEC_FULL.md §7, one `snafu` enum per subsystem
//! composed into a top-level [`Error`], following the teacher's
//! `StoreError`/`SvcError` convention of one error type per layer rather
//! than a single flat enum.

use snafu::Snafu;

use common_lib::error::StoreError;

/// Cloud-call classification result from the Gateway (SPEC_FULL.md §4.1).
#[derive(Debug, Snafu)]
pub enum GatewayError {
    #[snafu(display("cloud call throttled (429) after {tries} tries"))]
    Throttled { tries: u32 },

    #[snafu(display("cloud call failed with server error {status} after {tries} tries"))]
    ServerError { status: u16, tries: u32 },

    #[snafu(display("cloud call rejected with status {status}: {body}"))]
    Rejected { status: u16, body: String },

    #[snafu(display("transport error talking to the cloud API: {source}"))]
    Transport { source: reqwest::Error },

    #[snafu(display("failed to decode cloud API response body: {source}"))]
    Decode { source: serde_json::Error },
}

impl GatewayError {
    /// `true` for a plain "resource does not exist" 404, which the Step
    /// Engine interprets rather than treating as failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::Rejected { status: 404, .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Rejected { status, .. } => Some(*status),
            GatewayError::ServerError { status, .. } => Some(*status),
            GatewayError::Throttled { .. } => Some(429),
            _ => None,
        }
    }
}

/// Failures raised verifying a `registerWorker` identity proof
/// (SPEC_FULL.md §4.8). By design every variant collapses to the same
/// opaque message at the RPC boundary; `tracing::warn!` logs which one
/// actually fired.
#[derive(Debug, Snafu)]
pub enum RegistrationError {
    #[snafu(display("malformed attested-data document: {reason}"))]
    MalformedDocument { reason: String },

    #[snafu(display("signature verification failed"))]
    SignatureInvalid,

    #[snafu(display("certificate chain does not terminate at a pinned CA"))]
    UntrustedChain,

    #[snafu(display("attested vmId does not match the worker's observed vmId"))]
    VmIdMismatch,

    #[snafu(display("attested-data document has already expired"))]
    DocumentExpired,

    #[snafu(display("worker is not in the requested state"))]
    AlreadyRegistered,

    #[snafu(display("store error while registering worker: {source}"))]
    Store { source: StoreError },
}

impl RegistrationError {
    /// The single message ever surfaced to the calling worker
    /// (SPEC_FULL.md §4.8).
    pub const OPAQUE_MESSAGE: &'static str = "Signature validation error";
}

/// Errors from the Resource Step Engine (SPEC_FULL.md §4.3).
#[derive(Debug, Snafu)]
pub enum StepError {
    #[snafu(display("gateway error provisioning resource: {source}"))]
    Gateway { source: GatewayError },

    #[snafu(display("store error provisioning resource: {source}"))]
    Store { source: StoreError },

    #[snafu(display("resource entered an unexpected state: {reason}"))]
    UnexpectedState { reason: String },
}

/// Top-level error composing every subsystem's error type, following the
/// teacher's `#[snafu(context(false))]`-driven `From` composition.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(context(false))]
    Gateway { source: GatewayError },

    #[snafu(context(false))]
    Store { source: StoreError },

    #[snafu(context(false))]
    Step { source: StepError },

    #[snafu(context(false))]
    Registration { source: RegistrationError },

    #[snafu(display("config error: {reason}"))]
    Config { reason: String },
}
