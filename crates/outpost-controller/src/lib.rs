//! Outpost Controller
//!
//! Reconciles a cluster and its machines against the provider:
//!
//! - [`Tracker`] finds the provider resource behind a logical name, looking at
//!   a pinned id, the status map, then provider-side probes, before anything
//!   is created.
//! - [`Allocator`] hands out public IPs, either freshly created or taken from
//!   a tagged pool.
//! - [`ClusterReconciler`] runs the infrastructure steps in dependency order
//!   on create and in reverse on delete.
//! - [`MachineReconciler`] places one VM per machine with its volumes and
//!   keypair, and registers control-plane VMs with the load balancer.
//! - [`run_until_settled`] drives passes until a target converges.

pub mod allocator;
mod cluster;
pub mod driver;
pub mod error;
mod image;
mod keypair;
mod machine;
pub mod outcome;
pub mod services;
pub mod tracker;
mod volume;

// Re-exports
pub use allocator::Allocator;
pub use cluster::ClusterReconciler;
pub use driver::{Deployment, Reconcile, run_until_settled};
pub use error::{ErrorKind, ReconcileError, Result, ResultExt};
pub use machine::MachineReconciler;
pub use outcome::Outcome;
pub use services::Services;
pub use tracker::{Probe, Target, Tracker};
