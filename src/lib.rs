//! capm - Cluster API infrastructure provider for bare-metal hosts
//!
//! The provider reconciles `BareMetalCluster` and `BareMetalMachine` objects
//! on behalf of their Cluster API owners. Every reconcile re-fetches state,
//! resolves owners through the ownership graph, honours pause requests and
//! only then runs the provisioning hook and records status.
//!
//! # Modules
//!
//! - [`crd`] - Infrastructure CRDs and the Cluster API objects they belong to
//! - [`store`] - Object store boundary (Kubernetes API or in-memory)
//! - [`controller`] - Reconcilers, ownership resolver and pause gate
//! - [`backoff`] - Exponential backoff schedules
//! - [`manager`] - Per-kind controllers, owner fan-out and periodic resync
//! - [`error`] - Error types for the provider

#![deny(missing_docs)]

pub mod backoff;
pub mod controller;
pub mod crd;
pub mod error;
pub mod manager;
pub mod store;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager name used for server-side apply
pub const FIELD_MANAGER: &str = "capm-controller";
