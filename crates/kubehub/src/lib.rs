//! Settle kubehub: the real [`ClusterClient`], backed by kube-rs.
//!
//! Objects travel as `DynamicObject`; the API resource for each
//! group/version/kind is discovered once per client and cached.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::{
    api::{Api, DeleteParams, PostParams},
    core::{ApiResource, DynamicObject},
    discovery::{self, Scope},
    Client,
};
use metrics::counter;
use settle_apply::ClusterClient;
use settle_core::{ClientError, GroupVersionKind, Object, ObjectKey};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Field manager recorded on every write.
pub const FIELD_MANAGER: &str = "settle";

pub struct KubeClient {
    client: Client,
    resources: RwLock<HashMap<GroupVersionKind, (ApiResource, bool)>>,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client, resources: RwLock::new(HashMap::new()) }
    }

    /// Client for the current kubeconfig context (or in-cluster config).
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.context("creating kube client")?;
        info!(namespace = %client.default_namespace(), "kube client ready");
        Ok(Self::new(client))
    }

    async fn find_api_resource(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, bool), ClientError> {
        if let Some(hit) = self.resources.read().await.get(gvk) {
            return Ok(hit.clone());
        }
        let kgvk = kube::core::GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind);
        let (ar, caps) = discovery::pinned_kind(&self.client, &kgvk).await.map_err(map_kube_error)?;
        let namespaced = matches!(caps.scope, Scope::Namespaced);
        debug!(group = %gvk.group, version = %gvk.version, kind = %gvk.kind, plural = %ar.plural, namespaced, "discovered api resource");
        self.resources.write().await.insert(gvk.clone(), (ar.clone(), namespaced));
        Ok((ar, namespaced))
    }

    /// Api handle for `obj`'s kind; cluster-scoped kinds ignore the namespace.
    async fn api_for(&self, obj: &Object, namespace: Option<&str>) -> Result<(Api<DynamicObject>, bool), ClientError> {
        let gvk = obj.gvk().map_err(other)?;
        let (ar, namespaced) = self.find_api_resource(&gvk).await?;
        let api = if !namespaced {
            Api::all_with(self.client.clone(), &ar)
        } else {
            match namespace {
                Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
                None => Api::default_namespaced_with(self.client.clone(), &ar),
            }
        };
        Ok((api, namespaced))
    }
}

#[async_trait]
impl ClusterClient for KubeClient {
    async fn create(&self, obj: &mut Object) -> Result<(), ClientError> {
        let key = obj.key().map_err(other)?;
        let (api, namespaced) = self.api_for(obj, key.namespace.as_deref()).await?;
        let body = to_dynamic(obj, namespaced)?;
        let created = api.create(&post_params(), &body).await.map_err(map_kube_error)?;
        write_back(obj, &created)
    }

    async fn get(&self, key: &ObjectKey, obj: &mut Object) -> Result<(), ClientError> {
        let (api, _) = self.api_for(obj, key.namespace.as_deref()).await?;
        let live = api.get(&key.name).await.map_err(map_kube_error)?;
        write_back(obj, &live)
    }

    async fn update(&self, obj: &mut Object) -> Result<(), ClientError> {
        let key = obj.key().map_err(other)?;
        let (api, namespaced) = self.api_for(obj, key.namespace.as_deref()).await?;
        let mut body = to_dynamic(obj, namespaced)?;
        // replace needs the current resourceVersion
        if body.metadata.resource_version.is_none() {
            let live = api.get(&key.name).await.map_err(map_kube_error)?;
            body.metadata.resource_version = live.metadata.resource_version;
        }
        let updated = api.replace(&key.name, &post_params(), &body).await.map_err(map_kube_error)?;
        write_back(obj, &updated)
    }

    async fn delete(&self, obj: &Object) -> Result<(), ClientError> {
        let key = obj.key().map_err(other)?;
        let (api, _) = self.api_for(obj, key.namespace.as_deref()).await?;
        api.delete(&key.name, &DeleteParams::background()).await.map_err(map_kube_error)?;
        Ok(())
    }
}

fn post_params() -> PostParams {
    PostParams { field_manager: Some(FIELD_MANAGER.to_string()), ..Default::default() }
}

fn to_dynamic(obj: &Object, namespaced: bool) -> Result<DynamicObject, ClientError> {
    let mut d: DynamicObject = serde_json::from_value(obj.clone().into_value()).map_err(other)?;
    if !namespaced {
        d.metadata.namespace = None;
    }
    Ok(d)
}

fn write_back(obj: &mut Object, d: &DynamicObject) -> Result<(), ClientError> {
    let v = serde_json::to_value(d).map_err(other)?;
    obj.replace(Object::from_value(v).map_err(other)?);
    Ok(())
}

fn other<E: std::error::Error + Send + Sync + 'static>(e: E) -> ClientError {
    ClientError::Other(Box::new(e))
}

fn map_kube_error(e: kube::Error) -> ClientError {
    counter!("kube_errors_total", 1u64);
    match e {
        kube::Error::Api(resp) if resp.code == 404 => ClientError::NotFound(resp.message),
        kube::Error::Api(resp) => ClientError::Api { code: resp.code, reason: resp.reason, message: resp.message },
        err => ClientError::Other(Box::new(err)),
    }
}
