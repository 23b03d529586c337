//! Store-level error taxonomy, in the same one-`snafu`-enum-per-subsystem
//! style the rest of the control plane uses.

use snafu::Snafu;

/// Errors returned by a [`crate::store::Store`] implementation.
#[derive(Debug, Snafu)]
#[snafu(visibility = "pub(crate)")]
pub enum StoreError {
    /// The backing store could not be reached.
    #[snafu(display("Failed to connect to the store: {}", source))]
    Connect { source: std::io::Error },

    /// A `get` found no entry for the given key.
    #[snafu(display("No entry found for key '{}'", key))]
    MissingEntry { key: String },

    /// A `put` failed.
    #[snafu(display("Failed to put key '{}': {}", key, source))]
    Put {
        key: String,
        source: serde_json::Error,
    },

    /// A value failed to serialise before being written.
    #[snafu(display("Failed to serialise value: {}", source))]
    SerialiseValue { source: serde_json::Error },

    /// A value failed to deserialise after being read.
    #[snafu(display("Failed to deserialise value '{}': {}", value, source))]
    DeserialiseValue {
        value: String,
        source: serde_json::Error,
    },

    /// Two concurrent `update`s raced for the same row; the loser must retry.
    #[snafu(display("Failed to acquire the row lock for key '{}'", key))]
    FailedLock { key: String },

    /// The store has not finished initialising.
    #[snafu(display("Store not ready: {}", reason))]
    NotReady { reason: String },
}
