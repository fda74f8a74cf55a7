//! Public IP allocator
//!
//! Addresses are either dedicated (created per consumer) or drawn from a
//! shared pool identified by a tag. Pool picks are random among the free
//! members; two consumers racing on the same pool may still collide, in
//! which case the losing attach fails and the next reconcile allocates again.

use crate::error::{ReconcileError, Result, ResultExt, tolerate_gone};
use outpost_cloud::{Cloud, PublicIp, Tenant};
use outpost_core::ResourceMap;
use rand::seq::SliceRandom;

pub struct Allocator<'a> {
    cloud: &'a dyn Cloud,
    tenant: &'a Tenant,
    owner: &'a str,
}

impl<'a> Allocator<'a> {
    pub fn new(cloud: &'a dyn Cloud, tenant: &'a Tenant, owner: &'a str) -> Self {
        Self {
            cloud,
            tenant,
            owner,
        }
    }

    /// Get a free address for `key`, reusing the tracked one while it is free
    pub async fn allocate(
        &self,
        map: &mut ResourceMap,
        key: &str,
        name: &str,
        pool: Option<&str>,
    ) -> Result<PublicIp> {
        let api = self.cloud.public_ip(self.tenant);
        let cached = map.get(key).map(str::to_string);

        if let Some(id) = &cached {
            match api
                .get_public_ip(id)
                .await
                .context("failed to read tracked public ip")?
            {
                Some(ip) if !ip.is_attached() => {
                    tracing::debug!(key, public_ip_id = %id, "Reusing tracked public ip");
                    return Ok(ip);
                }
                Some(_) => tracing::warn!(key, public_ip_id = %id, "Tracked public ip is attached elsewhere, reallocating"),
                None => tracing::warn!(key, public_ip_id = %id, "Tracked public ip is gone, reallocating"),
            }
        }

        let ip = match pool.filter(|p| !p.is_empty()) {
            None => {
                let ip = api
                    .create_public_ip(self.owner, name)
                    .await
                    .context("failed to create public ip")?;
                tracing::info!(key, public_ip_id = %ip.public_ip_id, public_ip = %ip.public_ip, "Created public ip");
                ip
            }
            Some(pool) => {
                let members = api
                    .list_public_ips_from_pool(pool)
                    .await
                    .context("failed to list public ip pool")?;
                let free: Vec<&PublicIp> = members.iter().filter(|ip| !ip.is_attached()).collect();
                let picked = free
                    .choose(&mut rand::thread_rng())
                    .ok_or_else(|| ReconcileError::EmptyPool(pool.to_string()))?;
                tracing::info!(key, pool, public_ip_id = %picked.public_ip_id, "Picked public ip from pool");
                (*picked).clone()
            }
        };

        if cached.is_some() {
            map.replace(key, &ip.public_ip_id);
        } else {
            map.track(key, &ip.public_ip_id);
        }
        Ok(ip)
    }

    /// Adopt an address a consumer already carries
    ///
    /// No-op when `key` is already tracked or the address is unknown.
    pub async fn retrack(&self, map: &mut ResourceMap, key: &str, address: &str) -> Result<()> {
        if address.is_empty() || map.contains(key) {
            return Ok(());
        }
        let found = self
            .cloud
            .public_ip(self.tenant)
            .get_public_ip_by_ip(address)
            .await
            .context("failed to look up public ip by address")?;
        match found {
            Some(ip) => {
                tracing::debug!(key, public_ip_id = %ip.public_ip_id, address, "Retracked public ip");
                map.track(key, &ip.public_ip_id);
            }
            None => tracing::debug!(key, address, "Address is not a known public ip"),
        }
        Ok(())
    }

    /// Release the address tracked under `key`
    ///
    /// Pool members go back to the pool untouched and are only untracked.
    pub async fn deallocate(&self, map: &mut ResourceMap, key: &str) -> Result<()> {
        let Some(id) = map.get(key).map(str::to_string) else {
            return Ok(());
        };
        let api = self.cloud.public_ip(self.tenant);
        let ip = api
            .get_public_ip(&id)
            .await
            .context("failed to read public ip")?;
        match ip {
            Some(ip) if ip.pool().is_some() => {
                tracing::debug!(key, public_ip_id = %id, "Returning public ip to its pool");
            }
            Some(_) => {
                tolerate_gone(api.delete_public_ip(&id).await).context("failed to delete public ip")?;
                tracing::info!(key, public_ip_id = %id, "Deleted public ip");
            }
            None => tracing::debug!(key, public_ip_id = %id, "Public ip already released"),
        }
        map.untrack(key);
        Ok(())
    }
}
