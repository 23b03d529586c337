//! Provision and Removal pipelines (SPEC_FULL.md §4.4, §4.5), orchestrating
//! the Resource Step Engine in the fixed IP→NIC→VM→disks / VM→NIC→IP→disks
//! orders.

pub mod provision;
pub mod removal;
