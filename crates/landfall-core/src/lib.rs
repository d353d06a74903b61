//! landfall-core: shared building blocks for Landfall deployments.
//!
//! - [`config`]: `landfall.toml` parsing with defaults for every section
//! - [`cidr`]: deterministic network-block allocation and subnet layout
//! - [`retry`]: the bounded, fixed-delay retry engine every wait goes through

pub mod cidr;
pub mod config;
pub mod retry;

pub use cidr::{AllocationRequest, CidrAllocation, CidrBlock, CidrError, Subnet, SubnetTier};
pub use config::LandfallConfig;
pub use retry::{Observed, RetriesExhausted, RetryBudget, RetryError, Transient, retry_until, wait_for};
