//! Image lookup shared by the bastion and machine VMs

use crate::error::{ReconcileError, Result, ResultExt};
use crate::services::Services;
use outpost_core::{DEFAULT_KEY, ImageSpec, ResourceMap};

/// Resolve `spec` to an image id, caching it under the default key
///
/// A name wins over an id; name lookups are restricted to the account the
/// spec designates for the region, if any.
pub(crate) async fn resolve(services: &Services, map: &mut ResourceMap, spec: &ImageSpec) -> Result<String> {
    if let Some(id) = map.get(DEFAULT_KEY) {
        return Ok(id.to_string());
    }
    let api = services.cloud.image(&services.tenant);
    let image = if !spec.name.is_empty() {
        let account = spec.account_filter(services.region());
        api.get_image_by_name(&spec.name, account.as_deref())
            .await
            .context("failed to look up image by name")?
    } else if !spec.id.is_empty() {
        api.get_image(&spec.id)
            .await
            .context("failed to read image")?
    } else {
        None
    };
    let image = image.ok_or_else(|| {
        let wanted = if spec.name.is_empty() { &spec.id } else { &spec.name };
        ReconcileError::MissingResource(format!("image {}", wanted))
    })?;
    tracing::debug!(image_id = %image.image_id, image_name = %image.image_name, "Resolved image");
    map.track(DEFAULT_KEY, &image.image_id);
    Ok(image.image_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use outpost_cloud::{MemoryCloud, Tenant};
    use std::sync::Arc;

    fn services(cloud: &MemoryCloud) -> Services {
        Services::new(Arc::new(cloud.clone()), Tenant::new("workload", "eu-west-2", "AK", "SK"))
    }

    #[tokio::test]
    async fn test_name_lookup_uses_open_source_account() {
        let cloud = MemoryCloud::new();
        cloud.add_image("ubuntu-2204", "999999999999");
        let wanted = cloud.add_image("ubuntu-2204", "671899555720");
        let services = services(&cloud);
        let mut map = ResourceMap::new();
        let spec = ImageSpec {
            name: "ubuntu-2204".into(),
            outscale_open_source: true,
            ..Default::default()
        };

        let id = resolve(&services, &mut map, &spec).await.unwrap();
        assert_eq!(id, wanted.image_id);
        assert_eq!(map.get(DEFAULT_KEY), Some(wanted.image_id.as_str()));

        cloud.clear_calls();
        resolve(&services, &mut map, &spec).await.unwrap();
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_image_is_missing() {
        let cloud = MemoryCloud::new();
        let services = services(&cloud);
        let mut map = ResourceMap::new();
        let spec = ImageSpec {
            id: "ami-404".into(),
            ..Default::default()
        };
        let err = resolve(&services, &mut map, &spec).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingResource);
        assert!(map.is_empty());
    }
}
