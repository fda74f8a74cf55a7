//! Machine keypair

use crate::error::{Result, ResultExt, tolerate_gone};
use crate::machine::object_ref;
use crate::services::Services;
use outpost_core::{DEFAULT_KEY, Machine};

/// Make sure the keypair named by the VM spec exists, creating it if needed
pub(crate) async fn reconcile(services: &Services, machine: &mut Machine) -> Result<()> {
    let name = machine.spec.vm.keypair_name.clone();
    if name.is_empty() {
        return Ok(());
    }
    let api = services.cloud.keypair(&services.tenant);
    if api
        .get_keypair(&name)
        .await
        .context("failed to read keypair")?
        .is_none()
    {
        api.create_keypair(&name)
            .await
            .context("failed to create keypair")?;
        tracing::info!(keypair = %name, "Created keypair");
        services
            .recorder
            .normal(&object_ref(machine), "KeypairCreated", &format!("Created keypair {}", name));
    }
    machine.status.resources.keypair.replace(DEFAULT_KEY, &name);
    Ok(())
}

/// Delete the keypair when the spec asks for it; otherwise only forget it
pub(crate) async fn delete(services: &Services, machine: &mut Machine) -> Result<()> {
    let Some(name) = machine.status.resources.keypair.untrack(DEFAULT_KEY) else {
        return Ok(());
    };
    if !machine.spec.vm.delete_keypair {
        tracing::debug!(keypair = %name, "Keeping keypair");
        return Ok(());
    }
    tolerate_gone(services.cloud.keypair(&services.tenant).delete_keypair(&name).await)
        .context("failed to delete keypair")?;
    tracing::info!(keypair = %name, "Deleted keypair");
    services
        .recorder
        .normal(&object_ref(machine), "KeypairDeleted", &format!("Deleted keypair {}", name));
    Ok(())
}
