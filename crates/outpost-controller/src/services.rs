//! Collaborators shared by every reconcile

use crate::allocator::Allocator;
use crate::tracker::Tracker;
use outpost_cloud::{Cloud, Tenant};
use outpost_config::ControllerConfig;
use outpost_core::{EventRecorder, TracingRecorder};
use std::sync::Arc;

pub struct Services {
    pub cloud: Arc<dyn Cloud>,
    /// Tenant owning the cluster resources
    pub tenant: Tenant,
    /// Tenant owning the management net, used to accept peerings
    pub management: Tenant,
    pub recorder: Arc<dyn EventRecorder>,
    pub config: ControllerConfig,
}

impl Services {
    /// Services with the workload tenant doubling as management tenant
    pub fn new(cloud: Arc<dyn Cloud>, tenant: Tenant) -> Self {
        Self {
            cloud,
            management: tenant.clone(),
            tenant,
            recorder: Arc::new(TracingRecorder),
            config: ControllerConfig::default(),
        }
    }

    pub fn with_management(mut self, management: Tenant) -> Self {
        self.management = management;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Tracker for resources owned by `owner` (a cluster uid)
    pub fn tracker<'a>(&'a self, owner: &'a str) -> Tracker<'a> {
        Tracker::new(self.cloud.as_ref(), &self.tenant, owner)
    }

    pub fn allocator<'a>(&'a self, owner: &'a str) -> Allocator<'a> {
        Allocator::new(self.cloud.as_ref(), &self.tenant, owner)
    }

    pub fn region(&self) -> &str {
        self.tenant.region()
    }
}
