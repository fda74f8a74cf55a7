//! Credential contexts
//!
//! Every provider call runs under a tenant. A cluster normally uses a single
//! workload tenant; net peering also needs the management tenant that owns the
//! peer network.

use crate::error::{CloudError, Result};
use std::fmt;

/// Credentials and region under which API calls execute
#[derive(Clone, PartialEq, Eq)]
pub struct Tenant {
    name: String,
    region: String,
    access_key: String,
    secret_key: String,
}

impl Tenant {
    pub fn new(
        name: impl Into<String>,
        region: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Create a tenant from `OSC_ACCESS_KEY`, `OSC_SECRET_KEY` and `OSC_REGION`
    pub fn from_env(name: impl Into<String>) -> Result<Self> {
        let access_key = std::env::var("OSC_ACCESS_KEY")
            .map_err(|_| CloudError::InvalidConfig("OSC_ACCESS_KEY is not set".to_string()))?;
        let secret_key = std::env::var("OSC_SECRET_KEY")
            .map_err(|_| CloudError::InvalidConfig("OSC_SECRET_KEY is not set".to_string()))?;
        let region = std::env::var("OSC_REGION")
            .map_err(|_| CloudError::InvalidConfig("OSC_REGION is not set".to_string()))?;

        Ok(Self::new(name, region, access_key, secret_key))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl fmt::Debug for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tenant")
            .field("name", &self.name)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}
