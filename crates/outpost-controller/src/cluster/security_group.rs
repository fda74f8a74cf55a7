use super::{nat_service, net_id, object_ref};
use crate::error::{ReconcileError, Result, ResultExt, tolerate_gone};
use crate::services::Services;
use crate::tracker::{Probe, Target};
use outpost_cloud::{Flow, RuleRequest, SecurityGroup};
use outpost_core::{API_PORT, Cluster, Reconciler, Role, SecurityGroupSpec};

/// One request per (flow, ports, IP range), without duplicates
fn desired_rules(sg: &SecurityGroupSpec, nat_ranges: &[String]) -> Vec<RuleRequest> {
    let mut rules = Vec::new();
    let mut push = |rule: RuleRequest| {
        if !rules.contains(&rule) {
            rules.push(rule);
        }
    };
    for spec in &sg.rules {
        for range in &spec.ip_ranges {
            push(RuleRequest::ip_range(
                spec.flow,
                spec.ip_protocol.as_str(),
                spec.from_port_range,
                spec.to_port_range,
                range.as_str(),
            ));
        }
    }
    if sg.has_role(Role::LoadBalancer) {
        for range in nat_ranges {
            push(RuleRequest::ip_range(Flow::Inbound, "tcp", API_PORT, API_PORT, range.as_str()));
        }
    }
    rules
}

fn has_rule(sg: &SecurityGroup, rule: &RuleRequest) -> bool {
    let Some(range) = &rule.ip_range else {
        return false;
    };
    sg.rules.iter().any(|r| {
        r.flow == rule.flow
            && r.same_ports(&rule.ip_protocol, rule.from_port_range, rule.to_port_range)
            && r.ip_ranges.contains(range)
    })
}

/// IP-range rules present on the provider group
fn current_rules(sg: &SecurityGroup) -> Vec<RuleRequest> {
    sg.rules
        .iter()
        .flat_map(|r| {
            r.ip_ranges.iter().map(move |range| {
                RuleRequest::ip_range(
                    r.flow,
                    r.ip_protocol.as_str(),
                    r.from_port_range,
                    r.to_port_range,
                    range.as_str(),
                )
            })
        })
        .collect()
}

pub(crate) async fn reconcile(services: &Services, cluster: &mut Cluster) -> Result<()> {
    if !cluster.needs_reconciliation(Reconciler::SecurityGroup) {
        tracing::debug!("Security groups already reconciled for this generation");
        return Ok(());
    }
    let net_id = net_id(cluster)?;
    let uid = cluster.uid().to_string();
    let use_existing = cluster.network().use_existing.security_groups;
    let tracker = services.tracker(&uid);
    let api = services.cloud.security_group(&services.tenant);
    let nat_ranges = if cluster.has_ip_restriction() {
        nat_service::public_ranges(services, cluster).await?
    } else {
        Vec::new()
    };

    for sg in cluster.security_groups()? {
        let key = cluster.security_group_key(&sg);
        let name = cluster.security_group_name(&sg);
        let target = Target::new(&key)
            .pinned(sg.resource_id.as_deref())
            .probe(Probe::SecurityGroupName {
                net_id: &net_id,
                name: &name,
            });
        let security_group_id = match tracker
            .resolve(&mut cluster.status.resources.security_group, &target)
            .await
        {
            Ok(id) => id,
            Err(e) if e.is_not_found() => {
                if use_existing {
                    return Err(ReconcileError::MissingResource(format!("existing security group {}", name)));
                }
                let created = api
                    .create_security_group(&net_id, &uid, &name, &sg.description, sg.main)
                    .await
                    .context("failed to create security group")?;
                tracing::info!(security_group_id = %created.security_group_id, name = %name, "Created security group");
                cluster
                    .status
                    .resources
                    .security_group
                    .track(&key, &created.security_group_id);
                services.recorder.normal(
                    &object_ref(cluster),
                    "SecurityGroupCreated",
                    &format!("Created security group {}", name),
                );
                created.security_group_id
            }
            Err(e) => return Err(e),
        };
        if use_existing {
            continue;
        }

        let current = api
            .get_security_group(&security_group_id)
            .await
            .context("failed to read security group")?
            .ok_or_else(|| ReconcileError::MissingResource(format!("security group {}", security_group_id)))?;
        let desired = desired_rules(&sg, &nat_ranges);
        for rule in desired.iter().filter(|r| !has_rule(&current, r)) {
            api.create_security_group_rule(&security_group_id, rule)
                .await
                .context("failed to create security group rule")?;
            tracing::debug!(
                security_group_id = %security_group_id,
                flow = %rule.flow,
                protocol = %rule.ip_protocol,
                from = rule.from_port_range,
                to = rule.to_port_range,
                "Added security group rule"
            );
        }
        if sg.authoritative {
            for rule in current_rules(&current).iter().filter(|r| !desired.contains(r)) {
                tolerate_gone(api.delete_security_group_rule(&security_group_id, rule).await)
                    .context("failed to delete security group rule")?;
                tracing::info!(
                    security_group_id = %security_group_id,
                    flow = %rule.flow,
                    protocol = %rule.ip_protocol,
                    from = rule.from_port_range,
                    to = rule.to_port_range,
                    "Removed undeclared security group rule"
                );
            }
        }
    }

    cluster.mark_reconciled(Reconciler::SecurityGroup);
    Ok(())
}

/// Remove member rules first so groups referencing each other can be deleted
pub(crate) async fn delete(services: &Services, cluster: &mut Cluster) -> Result<()> {
    if cluster.network().use_existing.security_groups {
        tracing::debug!("Security groups are not managed, keeping them");
        return Ok(());
    }
    let api = services.cloud.security_group(&services.tenant);
    let tracked: Vec<(String, String)> = cluster
        .status
        .resources
        .security_group
        .iter()
        .map(|(k, id)| (k.to_string(), id.to_string()))
        .collect();

    let mut live = Vec::new();
    for (key, id) in &tracked {
        match api
            .get_security_group(id)
            .await
            .context("failed to read security group")?
        {
            Some(sg) if sg.security_group_name != "default" => live.push(sg),
            Some(_) => tracing::debug!(key = %key, "Keeping default security group"),
            None => tracing::debug!(key = %key, security_group_id = %id, "Security group already gone"),
        }
    }

    for sg in &live {
        for rule in &sg.rules {
            for member in &rule.security_groups_members {
                let request = RuleRequest::member(
                    rule.flow,
                    rule.ip_protocol.as_str(),
                    rule.from_port_range,
                    rule.to_port_range,
                    member.as_str(),
                );
                tolerate_gone(api.delete_security_group_rule(&sg.security_group_id, &request).await)
                    .context("failed to delete security group member rule")?;
            }
        }
    }
    for sg in &live {
        tolerate_gone(api.delete_security_group(&sg.security_group_id).await)
            .context("failed to delete security group")?;
        tracing::info!(security_group_id = %sg.security_group_id, name = %sg.security_group_name, "Deleted security group");
    }
    for (key, _) in &tracked {
        cluster.status.resources.security_group.untrack(key);
    }
    if !live.is_empty() {
        services
            .recorder
            .normal(&object_ref(cluster), "SecurityGroupsDeleted", "Deleted security groups");
    }
    Ok(())
}
