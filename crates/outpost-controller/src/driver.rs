//! Reconcile loop
//!
//! Runs passes until the target converges, sleeping between passes on
//! requeues and backing off on errors.

use crate::cluster::ClusterReconciler;
use crate::error::{ReconcileError, Result};
use crate::machine::MachineReconciler;
use crate::outcome::Outcome;
use crate::services::Services;
use async_trait::async_trait;
use outpost_config::ControllerConfig;
use outpost_core::{Cluster, Machine};

/// Something a single reconcile pass can be run against
#[async_trait]
pub trait Reconcile: Send {
    async fn reconcile_once(&mut self) -> Result<Outcome>;
}

/// Run passes until one returns [`Outcome::Done`]
///
/// Each pass is bounded by the configured call timeout. With `max_passes`
/// set, the last outcome or error is returned once the limit is reached.
pub async fn run_until_settled<R: Reconcile + ?Sized>(
    target: &mut R,
    config: &ControllerConfig,
    max_passes: Option<u32>,
) -> Result<Outcome> {
    let deadline = config.call_timeout();
    let mut pass = 0u32;
    let mut failures = 0u32;
    loop {
        pass += 1;
        let result = match tokio::time::timeout(deadline, target.reconcile_once()).await {
            Ok(result) => result,
            Err(_) => Err(ReconcileError::DeadlineExceeded(deadline)),
        };
        let exhausted = max_passes.is_some_and(|max| pass >= max);
        match result {
            Ok(Outcome::Done) => {
                tracing::info!(pass, "Reconcile settled");
                return Ok(Outcome::Done);
            }
            Ok(Outcome::Requeue(delay)) => {
                failures = 0;
                if exhausted {
                    return Ok(Outcome::Requeue(delay));
                }
                tracing::debug!(pass, ?delay, "Requeued");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if exhausted {
                    return Err(e);
                }
                let delay = config.backoff.delay(failures);
                failures += 1;
                tracing::warn!(pass, error = %e, ?delay, "Reconcile pass failed, backing off");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// A cluster and its machines, reconciled together
pub struct Deployment<'a> {
    services: &'a Services,
    pub cluster: Cluster,
    pub machines: Vec<Machine>,
}

impl<'a> Deployment<'a> {
    pub fn new(services: &'a Services, cluster: Cluster, machines: Vec<Machine>) -> Self {
        Self {
            services,
            cluster,
            machines,
        }
    }

    /// Flag the cluster and every machine for deletion
    pub fn request_deletion(&mut self) {
        self.cluster.metadata.deletion_requested = true;
        for machine in &mut self.machines {
            machine.metadata.deletion_requested = true;
        }
    }
}

impl Deployment<'_> {
    async fn reconcile_machines(&mut self) -> Result<Outcome> {
        let machines = MachineReconciler::new(self.services);
        let mut outcome = Outcome::Done;
        let mut finished = Vec::new();
        for (index, machine) in self.machines.iter_mut().enumerate() {
            let result = machines.reconcile(&self.cluster, machine).await?;
            if machine.metadata.deletion_requested && result.is_done() {
                finished.push(index);
            }
            outcome = outcome.merge(result);
        }
        for index in finished.into_iter().rev() {
            let machine = self.machines.remove(index);
            tracing::info!(machine = %machine.name(), "Machine deleted");
        }
        Ok(outcome)
    }
}

/// The cluster goes first on the way up and last on the way down
#[async_trait]
impl Reconcile for Deployment<'_> {
    async fn reconcile_once(&mut self) -> Result<Outcome> {
        let clusters = ClusterReconciler::new(self.services);
        if self.cluster.metadata.deletion_requested {
            let outcome = self.reconcile_machines().await?;
            let cluster = clusters.reconcile(&mut self.cluster, &self.machines).await?;
            return Ok(outcome.merge(cluster));
        }
        let outcome = clusters.reconcile(&mut self.cluster, &self.machines).await?;
        Ok(outcome.merge(self.reconcile_machines().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::time::Duration;

    /// Fails `failures` times, requeues `requeues` times, then settles
    struct Scripted {
        failures: u32,
        requeues: u32,
        passes: u32,
        stall: Option<Duration>,
    }

    impl Scripted {
        fn new(failures: u32, requeues: u32) -> Self {
            Self {
                failures,
                requeues,
                passes: 0,
                stall: None,
            }
        }
    }

    #[async_trait]
    impl Reconcile for Scripted {
        async fn reconcile_once(&mut self) -> Result<Outcome> {
            self.passes += 1;
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            if self.failures > 0 {
                self.failures -= 1;
                return Err(ReconcileError::EmptyPool("edge".into()));
            }
            if self.requeues > 0 {
                self.requeues -= 1;
                return Ok(Outcome::Requeue(Duration::from_secs(30)));
            }
            Ok(Outcome::Done)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_done() {
        let mut target = Scripted::new(2, 1);
        let outcome = run_until_settled(&mut target, &ControllerConfig::default(), None)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(target.passes, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_limit_returns_last_error() {
        let mut target = Scripted::new(5, 0);
        let err = run_until_settled(&mut target, &ControllerConfig::default(), Some(3))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyPool);
        assert_eq!(target.passes, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_limit_returns_requeue() {
        let mut target = Scripted::new(0, 5);
        let outcome = run_until_settled(&mut target, &ControllerConfig::default(), Some(2))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Requeue(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_pass_hits_deadline() {
        let config = ControllerConfig {
            call_timeout_secs: 5,
            ..Default::default()
        };
        let mut target = Scripted::new(0, 0);
        target.stall = Some(Duration::from_secs(60));
        let err = run_until_settled(&mut target, &config, Some(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    }
}
