//! Outpost Cloud
//!
//! Provider façade for the Outpost reconciler: the resource model the
//! provider returns, one async service trait per resource kind, tenants
//! (credential contexts) and the tag vocabulary used for lookups.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │               outpost-controller                 │
//! │        (cluster / machine reconcilers)           │
//! └─────────────────┬───────────────────────────────┘
//!                   │ Cloud::net(&tenant), ...
//! ┌─────────────────▼───────────────────────────────┐
//! │                 outpost-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │        Service traits per kind            │   │
//! │  │  NetApi, SubnetApi, VolumeApi, ...        │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │    Model     │  │   Tenants    │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬─────────────────────────────────────────┘
//!         │
//! ┌───────▼───────┐
//! │ MemoryCloud   │  (feature "memory")
//! └───────────────┘
//! ```

pub mod error;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod model;
pub mod service;
pub mod tag;
pub mod tenant;

// Re-exports
pub use error::{CloudError, Result};
#[cfg(any(test, feature = "memory"))]
pub use memory::{Call, MemoryCloud};
pub use model::{
    Flow, HealthCheck, Image, InternetService, Keypair, Listener, LoadBalancer,
    LoadBalancerRequest, NatPublicIp, NatService, Net, NetAccessPoint, NetPeering, NetPeeringState,
    PublicIp, Route, RouteTable, RouteTableLink, RouteTarget, RuleRequest, SecurityGroup,
    SecurityGroupRule, Subnet, Vm, VmRequest, VmState, Volume, VolumeRequest, VolumeState,
};
pub use service::{
    Cloud, ImageApi, InternetServiceApi, KeypairApi, LoadBalancerApi, NatServiceApi,
    NetAccessPointApi, NetApi, NetPeeringApi, PublicIpApi, RouteTableApi, SecurityGroupApi,
    SubnetApi, TagApi, VmApi, VolumeApi,
};
pub use tag::{ResourceTag, ResourceType, Tag};
pub use tenant::Tenant;
