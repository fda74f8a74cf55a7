//! Outpost Core
//!
//! Declarative cluster and machine model, derived network defaults,
//! reconciliation status and its file-backed store.

pub mod error;
pub mod events;
pub mod model;
pub mod scope;
pub mod status;
pub mod store;

// Re-exports
pub use error::{CoreError, Result};
pub use events::{Event, EventRecorder, EventType, MemoryRecorder, TracingRecorder};
pub use model::*;
pub use scope::{
    API_PORT, CLIENT_TOKEN_MAX_LEN, DEFAULT_NET_IP_RANGE, DEFAULT_ROUTE, PROVIDER_ID_PREFIX,
    client_token, parse_ipv4_cidr,
};
pub use status::{
    ClusterResources, Condition, ConditionType, Conditions, DEFAULT_KEY, Generations,
    MachineResources, Reconciler, ResourceMap,
};
pub use store::{StatusStore, StoredObject, Versioned};
