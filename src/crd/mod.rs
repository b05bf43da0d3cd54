//! Custom Resource Definitions for the bare-metal provider
//!
//! This module contains the infrastructure CRDs owned by the provider and the
//! Cluster API objects it reads.

mod bare_metal;
mod capi;
mod types;

pub use bare_metal::{
    BareMetalCluster, BareMetalClusterSpec, BareMetalMachine, BareMetalMachineSpec, Image,
    InfrastructureObject, InfrastructureStatus,
};
pub use capi::{Cluster, ClusterSpec, Machine, MachineSpec, CAPI_GROUP, CLUSTER_NAME_LABEL};
pub use types::{
    find_condition, set_condition, ApiEndpoint, Condition, ConditionStatus, ObjectReference,
    READY_CONDITION,
};
