//! The reconciler: sequences decode, namespace, annotate, remote call and wait.
//!
//! Nothing is retried here. Every failure aborts the operation and is handed
//! back unchanged; the only bounded retry is the convergence wait.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use settle_core::{manifest, readiness, Object, Readiness, ResourceId, Result, SettleError};
use settle_poll::Convergence;
use tracing::{debug, info, warn};

use crate::annotate::annotate;
use crate::config::ReconcileConfig;
use crate::ClusterClient;

const DELETING: &str = "deleting";
const DELETED: &str = "deleted";

pub struct Reconciler<C: ?Sized> {
    client: Arc<C>,
    config: ReconcileConfig,
}

impl<C: ClusterClient + ?Sized> Reconciler<C> {
    pub fn new(client: Arc<C>, config: ReconcileConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Create the object described by `content` and return its identifier.
    pub async fn create(&self, namespace: &str, content: &str, timeout: Duration) -> Result<ResourceId> {
        counter!("reconcile_create_total", 1u64);
        track(self.create_inner(namespace, content, timeout).await)
    }

    async fn create_inner(&self, namespace: &str, content: &str, timeout: Duration) -> Result<ResourceId> {
        let mut obj = manifest::decode(content)?.ok_or(SettleError::EmptyManifest)?;
        self.config.namespace_policy.apply(&mut obj, namespace)?;
        let id = ResourceId::from_object(&obj)?;
        if self.config.annotate {
            annotate(&mut obj)?;
        }

        info!(id = %id, "creating object");
        self.client.create(&mut obj).await?;
        if self.config.wait_for_ready {
            self.wait_ready(&id, timeout).await?;
        }
        info!(id = %id, "object created");
        Ok(id)
    }

    /// Fetch the latest remote state of `id`.
    pub async fn read(&self, id: &ResourceId) -> Result<Object> {
        let mut obj = id.to_object()?;
        debug!(id = %id, "reading object");
        self.client.get(&id.key(), &mut obj).await?;
        Ok(obj)
    }

    /// Apply new `content` to the object behind `id`.
    ///
    /// The identifier's namespace acts as the namespace parameter. Changing the
    /// namespace, group, kind or name is refused with `IdentityMismatch`; a new
    /// version of the same group is accepted and reflected in the returned id.
    pub async fn update(&self, id: &ResourceId, content: &str, timeout: Duration) -> Result<ResourceId> {
        counter!("reconcile_update_total", 1u64);
        track(self.update_inner(id, content, timeout).await)
    }

    async fn update_inner(&self, id: &ResourceId, content: &str, timeout: Duration) -> Result<ResourceId> {
        let current = id.gvk()?;
        let mut obj = manifest::decode(content)?.ok_or(SettleError::EmptyManifest)?;
        self.config.namespace_policy.apply(&mut obj, &id.namespace)?;
        let next = ResourceId::from_object(&obj)?;
        let requested = obj.gvk()?;

        let checks = [
            ("namespace", &id.namespace, &next.namespace),
            ("group", &current.group, &requested.group),
            ("kind", &id.kind, &next.kind),
            ("name", &id.name, &next.name),
        ];
        if let Some((field, cur, req)) = checks.into_iter().find(|(_, cur, req)| cur != req) {
            return Err(SettleError::IdentityMismatch { field, current: cur.clone(), requested: req.clone() });
        }
        if self.config.annotate {
            annotate(&mut obj)?;
        }

        info!(id = %next, "updating object");
        self.client.update(&mut obj).await?;
        if self.config.wait_for_ready {
            self.wait_ready(&next, timeout).await?;
        }
        info!(id = %next, "object updated");
        Ok(next)
    }

    /// Delete the object behind `id` and wait until it is gone.
    pub async fn delete(&self, id: &ResourceId, timeout: Duration) -> Result<()> {
        counter!("reconcile_delete_total", 1u64);
        track(self.delete_inner(id, timeout).await)
    }

    async fn delete_inner(&self, id: &ResourceId, timeout: Duration) -> Result<()> {
        let obj = id.to_object()?;
        info!(id = %id, "deleting object");
        self.client.delete(&obj).await?;
        if !self.config.wait_for_deletion {
            return Ok(());
        }

        let key = id.key();
        let client = &self.client;
        self.convergence(id, &[DELETING], &[DELETED], timeout)
            .treat_not_found_as(DELETED)
            .wait(|| {
                let mut current = obj.clone();
                let key = key.clone();
                async move {
                    client.get(&key, &mut current).await?;
                    Ok::<_, SettleError>((None::<()>, DELETING.to_string()))
                }
            })
            .await?;
        info!(id = %id, "object deleted");
        Ok(())
    }

    async fn wait_ready(&self, id: &ResourceId, timeout: Duration) -> Result<Object> {
        let skeleton = id.to_object()?;
        let key = id.key();
        let client = &self.client;
        let settled = self
            .convergence(id, &[Readiness::PENDING], &[Readiness::READY], timeout)
            .wait(|| {
                let mut current = skeleton.clone();
                let key = key.clone();
                async move {
                    client.get(&key, &mut current).await?;
                    let state = readiness(&current)?;
                    debug!(object = %current, state = %state, "observed");
                    Ok::<_, SettleError>((Some(current), state.label().to_string()))
                }
            })
            .await?;
        Ok(settled.unwrap_or(skeleton))
    }

    fn convergence(&self, id: &ResourceId, pending: &[&str], target: &[&str], timeout: Duration) -> Convergence {
        let poll = &self.config.poll;
        Convergence::new(id.to_string(), pending, target)
            .timeout(timeout)
            .delay(poll.delay)
            .min_interval(poll.min_interval)
            .poll_interval(poll.poll_interval)
            .continuous_target_occurrence(poll.continuous_target_occurrence)
    }
}

fn track<T>(res: Result<T>) -> Result<T> {
    if let Err(e) = &res {
        counter!("reconcile_errors_total", 1u64);
        warn!(error = %e, "reconcile failed");
    }
    res
}
