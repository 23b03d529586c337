//! Azure cloud worker provisioning control plane: reconciles
//! [`common_lib::types::Worker`] rows against live Azure resources through
//! a Gateway-rate-limited ARM client, a Resource Step Engine, Provision and
//! Removal pipelines, a `checkWorker` scanner, a `registerWorker` identity
//! verifier and a `provision` capacity provisioner (SPEC_FULL.md §1-§5).

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod estimator;
pub mod gateway;
pub mod nicer_id;
pub mod notify;
pub mod password;
pub mod pipeline;
pub mod provisioner;
pub mod registration;
pub mod scanner;
pub mod steps;
mod store_ext;

pub use context::Context;
