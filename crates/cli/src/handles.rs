//! Stateful apply/destroy on top of the reconciler: the handle store keeps the
//! resource identifier between runs, the way a host framework would.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use settle_apply::{ClusterClient, Reconciler};
use settle_core::{Object, ResourceId, SettleError};
use settle_persist::{now_ts, Handle, HandleStore};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Created,
    Updated,
    Replaced,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Created => "created",
            Action::Updated => "updated",
            Action::Replaced => "replaced",
        })
    }
}

fn load_id(handle: &Handle) -> Result<ResourceId> {
    handle.id.parse::<ResourceId>().with_context(|| format!("handle '{}' holds a corrupt id", handle.key))
}

fn save(store: &dyn HandleStore, key: &str, namespace: &str, id: &ResourceId) -> Result<()> {
    store.put(&Handle { key: key.to_string(), id: id.to_string(), namespace: namespace.to_string(), ts: now_ts() })
}

/// Delete, treating an already missing object as success.
async fn delete_if_present<C: ClusterClient + ?Sized>(rec: &Reconciler<C>, id: &ResourceId, timeout: Duration) -> Result<()> {
    match rec.delete(id, timeout).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            warn!(id = %id, "object already gone");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Create or update the object tracked under `key`.
///
/// The namespace parameter cannot change in place: a different value, or a
/// manifest that renames the object, replaces it (delete, then create).
pub async fn apply<C: ClusterClient + ?Sized>(
    rec: &Reconciler<C>,
    store: &dyn HandleStore,
    key: &str,
    namespace: &str,
    content: &str,
    timeout: Duration,
) -> Result<(ResourceId, Action)> {
    let Some(handle) = store.get(key)? else {
        let id = rec.create(namespace, content, timeout).await?;
        save(store, key, namespace, &id)?;
        return Ok((id, Action::Created));
    };
    let id = load_id(&handle)?;

    if handle.namespace != namespace {
        info!(key = %key, from = %handle.namespace, to = %namespace, "namespace parameter changed; replacing");
        return replace(rec, store, key, &id, namespace, content, timeout).await;
    }
    match rec.update(&id, content, timeout).await {
        Ok(next) => {
            save(store, key, namespace, &next)?;
            Ok((next, Action::Updated))
        }
        Err(SettleError::IdentityMismatch { field, .. }) => {
            info!(key = %key, field, "identity changed; replacing");
            replace(rec, store, key, &id, namespace, content, timeout).await
        }
        Err(e) if e.is_not_found() => {
            warn!(key = %key, id = %id, "tracked object is gone; creating it again");
            let id = rec.create(namespace, content, timeout).await?;
            save(store, key, namespace, &id)?;
            Ok((id, Action::Created))
        }
        Err(e) => Err(e.into()),
    }
}

async fn replace<C: ClusterClient + ?Sized>(
    rec: &Reconciler<C>,
    store: &dyn HandleStore,
    key: &str,
    old: &ResourceId,
    namespace: &str,
    content: &str,
    timeout: Duration,
) -> Result<(ResourceId, Action)> {
    delete_if_present(rec, old, timeout).await?;
    store.remove(key)?;
    let id = rec.create(namespace, content, timeout).await?;
    save(store, key, namespace, &id)?;
    Ok((id, Action::Replaced))
}

/// Delete the object tracked under `key` and forget the handle.
pub async fn destroy<C: ClusterClient + ?Sized>(rec: &Reconciler<C>, store: &dyn HandleStore, key: &str, timeout: Duration) -> Result<Option<ResourceId>> {
    let Some(handle) = store.get(key)? else { return Ok(None) };
    let id = load_id(&handle)?;
    delete_if_present(rec, &id, timeout).await?;
    store.remove(key)?;
    Ok(Some(id))
}

/// Read the tracked object; a handle whose object vanished is dropped.
pub async fn refresh<C: ClusterClient + ?Sized>(rec: &Reconciler<C>, store: &dyn HandleStore, key: &str) -> Result<Option<Object>> {
    let Some(handle) = store.get(key)? else { return Ok(None) };
    let id = load_id(&handle)?;
    match rec.read(&id).await {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if e.is_not_found() => {
            warn!(key = %key, id = %id, "tracked object is gone; dropping handle");
            store.remove(key)?;
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
