#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value as Json};
use settle_apply::{last_applied, ClusterClient, PollConfig, ReconcileConfig, Reconciler, LAST_APPLIED_ANNOTATION};
use settle_core::{ClientError, NamespacePolicy, Object, ObjectKey, ResourceId, SettleError};

const DEPLOYMENT: &str = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  replicas: 2\n";
const CONFIGMAP: &str = r#"{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cfg"}, "data": {"k": "v"}}"#;
const TIMEOUT: Duration = Duration::from_secs(60);

/// In-memory control plane. Statuses are handed out one per `get`; the last
/// one sticks. Deleted objects stay visible for `linger_gets` reads.
#[derive(Default)]
struct FakeCluster {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    objects: HashMap<String, Object>,
    statuses: VecDeque<Json>,
    deleting: HashSet<String>,
    linger_gets: usize,
    fail_get: Option<u16>,
    calls: Vec<String>,
}

impl FakeCluster {
    fn with_statuses(statuses: Vec<Json>) -> Arc<Self> {
        let fake = Self::default();
        fake.state.lock().unwrap().statuses = statuses.into();
        Arc::new(fake)
    }

    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn count(&self, verb: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(verb)).count()
    }

    fn stored(&self, slot: &str) -> Option<Object> {
        self.state.lock().unwrap().objects.get(slot).cloned()
    }

    fn seed(&self, obj: Object) {
        let slot = slot_of(&obj);
        self.state.lock().unwrap().objects.insert(slot, obj);
    }
}

fn slot_of(obj: &Object) -> String {
    format!("{}/{}", obj.kind().unwrap(), obj.key().unwrap())
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn create(&self, obj: &mut Object) -> Result<(), ClientError> {
        let slot = slot_of(obj);
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!("create {}", slot));
        if s.objects.contains_key(&slot) {
            return Err(ClientError::Api { code: 409, reason: "AlreadyExists".into(), message: format!("{} already exists", slot) });
        }
        obj.as_map_mut()["metadata"]["resourceVersion"] = json!("1");
        s.objects.insert(slot, obj.clone());
        Ok(())
    }

    async fn get(&self, key: &ObjectKey, obj: &mut Object) -> Result<(), ClientError> {
        let slot = format!("{}/{}", obj.kind().unwrap(), key);
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!("get {}", slot));
        if let Some(code) = s.fail_get {
            return Err(ClientError::Api { code, reason: "InternalError".into(), message: "injected".into() });
        }
        if s.deleting.contains(&slot) {
            if s.linger_gets == 0 {
                s.deleting.remove(&slot);
                s.objects.remove(&slot);
            } else {
                s.linger_gets -= 1;
            }
        }
        let Some(mut current) = s.objects.get(&slot).cloned() else {
            return Err(ClientError::NotFound(slot));
        };
        let status = if s.statuses.len() > 1 { s.statuses.pop_front() } else { s.statuses.front().cloned() };
        if let Some(status) = status {
            current.as_map_mut().insert("status".into(), status);
            s.objects.insert(slot, current.clone());
        }
        obj.replace(current);
        Ok(())
    }

    async fn update(&self, obj: &mut Object) -> Result<(), ClientError> {
        let slot = slot_of(obj);
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!("update {}", slot));
        let Some(prev) = s.objects.get(&slot).cloned() else {
            return Err(ClientError::NotFound(slot));
        };
        let mut next = obj.clone();
        if let Some(status) = prev.status() {
            next.as_map_mut().insert("status".into(), status.clone());
        }
        s.objects.insert(slot, next);
        Ok(())
    }

    async fn delete(&self, obj: &Object) -> Result<(), ClientError> {
        let slot = slot_of(obj);
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!("delete {}", slot));
        if !s.objects.contains_key(&slot) {
            return Err(ClientError::NotFound(slot));
        }
        s.deleting.insert(slot);
        Ok(())
    }
}

fn fast_config() -> ReconcileConfig {
    ReconcileConfig {
        poll: PollConfig {
            delay: Duration::ZERO,
            min_interval: Duration::from_secs(1),
            poll_interval: None,
            continuous_target_occurrence: 1,
        },
        ..ReconcileConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn create_waits_until_ready_and_returns_id() {
    let fake = FakeCluster::with_statuses(vec![json!({}), json!({ "readyReplicas": 0 }), json!({ "readyReplicas": 2 })]);
    let rec = Reconciler::new(fake.clone(), fast_config());

    let id = rec.create("team", DEPLOYMENT, TIMEOUT).await.unwrap();
    assert_eq!(id.to_string(), "team::apps/v1::Deployment::web");
    assert_eq!(fake.count("create"), 1);
    assert_eq!(fake.count("get"), 3);

    let stored = fake.stored("Deployment/team/web").unwrap();
    assert_eq!(stored.namespace().unwrap(), "team");
    let applied = last_applied(&stored).unwrap().unwrap();
    assert_eq!(applied.name().unwrap(), "web");
    assert_eq!(applied.namespace().unwrap(), "team");
}

#[tokio::test(start_paused = true)]
async fn create_without_status_settles_on_first_read() {
    let fake = Arc::new(FakeCluster::default());
    let rec = Reconciler::new(fake.clone(), fast_config());
    let id = rec.create("", CONFIGMAP, TIMEOUT).await.unwrap();
    assert_eq!(id, ResourceId::new("default", "v1", "ConfigMap", "cfg"));
    assert_eq!(fake.calls(), vec!["create ConfigMap/default/cfg", "get ConfigMap/default/cfg"]);
}

#[tokio::test(start_paused = true)]
async fn create_times_out_with_last_state() {
    let fake = FakeCluster::with_statuses(vec![json!({ "phase": "Pending" })]);
    let mut cfg = fast_config();
    cfg.poll.min_interval = Duration::from_secs(5);
    let rec = Reconciler::new(fake.clone(), cfg);

    let err = rec.create("ns", DEPLOYMENT, Duration::from_secs(8)).await.unwrap_err();
    match err {
        SettleError::ConvergenceTimeout { subject, last_state, .. } => {
            assert_eq!(subject, "ns::apps/v1::Deployment::web");
            assert_eq!(last_state.as_deref(), Some("pending"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn manifest_namespace_wins_over_parameter() {
    let fake = Arc::new(FakeCluster::default());
    let rec = Reconciler::new(fake.clone(), fast_config());
    let manifest = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  namespace: ns2\n";
    let id = rec.create("ns1", manifest, TIMEOUT).await.unwrap();
    assert_eq!(id.namespace, "ns2");
}

#[tokio::test(start_paused = true)]
async fn strict_policy_refuses_to_guess() {
    let fake = Arc::new(FakeCluster::default());
    let cfg = ReconcileConfig { namespace_policy: NamespacePolicy::Strict, ..fast_config() };
    let rec = Reconciler::new(fake.clone(), cfg);
    let err = rec.create("", CONFIGMAP, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, SettleError::MissingNamespace), "{}", err);
    assert!(fake.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn bad_manifests_never_reach_the_cluster() {
    let fake = Arc::new(FakeCluster::default());
    let rec = Reconciler::new(fake.clone(), fast_config());

    let err = rec.create("ns", "", TIMEOUT).await.unwrap_err();
    assert!(matches!(err, SettleError::EmptyManifest), "{}", err);
    let err = rec.create("ns", "kind: {ConfigMap\n", TIMEOUT).await.unwrap_err();
    assert!(matches!(err, SettleError::ManifestParse(_)), "{}", err);
    assert!(fake.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn toggles_disable_annotation_and_wait() {
    let fake = FakeCluster::with_statuses(vec![json!({})]);
    let cfg = ReconcileConfig { annotate: false, wait_for_ready: false, ..fast_config() };
    let rec = Reconciler::new(fake.clone(), cfg);
    rec.create("ns", DEPLOYMENT, TIMEOUT).await.unwrap();
    assert_eq!(fake.count("get"), 0);
    let stored = fake.stored("Deployment/ns/web").unwrap();
    assert!(stored.annotation(LAST_APPLIED_ANNOTATION).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn create_passes_remote_errors_through() {
    let fake = Arc::new(FakeCluster::default());
    fake.seed(Object::from_value(json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "cfg", "namespace": "ns" } })).unwrap());
    let rec = Reconciler::new(fake.clone(), fast_config());
    let err = rec.create("ns", CONFIGMAP, TIMEOUT).await.unwrap_err();
    match err {
        SettleError::Remote(ClientError::Api { code, .. }) => assert_eq!(code, 409),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn read_reflects_remote_state() {
    let fake = FakeCluster::with_statuses(vec![json!({ "readyReplicas": 1 })]);
    let rec = Reconciler::new(fake.clone(), fast_config());
    let id = rec.create("ns", DEPLOYMENT, TIMEOUT).await.unwrap();

    let obj = rec.read(&id).await.unwrap();
    assert_eq!(obj.status().unwrap()["readyReplicas"], json!(1));
    assert_eq!(obj.as_map()["spec"]["replicas"], json!(2));

    let missing = ResourceId::new("ns", "apps/v1", "Deployment", "nope");
    let err = rec.read(&missing).await.unwrap_err();
    assert!(err.is_not_found(), "{}", err);
}

#[tokio::test(start_paused = true)]
async fn corrupt_identifiers_are_rejected_before_any_call() {
    let fake = Arc::new(FakeCluster::default());
    let rec = Reconciler::new(fake.clone(), fast_config());
    let id = ResourceId::new("ns", "a/b/c", "Deployment", "web");
    let err = rec.read(&id).await.unwrap_err();
    assert!(matches!(err, SettleError::InvalidIdentifier { .. }), "{}", err);
    let err = rec.delete(&id, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, SettleError::InvalidIdentifier { .. }), "{}", err);
    assert!(fake.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn update_keeps_identity_and_waits() {
    let fake = FakeCluster::with_statuses(vec![json!({ "readyReplicas": 1 })]);
    let rec = Reconciler::new(fake.clone(), fast_config());
    let id = rec.create("ns", DEPLOYMENT, TIMEOUT).await.unwrap();

    let scaled = DEPLOYMENT.replace("replicas: 2", "replicas: 5");
    let next = rec.update(&id, &scaled, TIMEOUT).await.unwrap();
    assert_eq!(next, id);
    let stored = fake.stored("Deployment/ns/web").unwrap();
    assert_eq!(stored.as_map()["spec"]["replicas"], json!(5));
    let applied = last_applied(&stored).unwrap().unwrap();
    assert_eq!(applied.as_map()["spec"]["replicas"], json!(5));
    assert_eq!(fake.count("update"), 1);
    assert_eq!(fake.count("get"), 2);
}

#[tokio::test(start_paused = true)]
async fn update_accepts_a_new_version_of_the_same_group() {
    let fake = Arc::new(FakeCluster::default());
    let rec = Reconciler::new(fake.clone(), fast_config());
    let id = ResourceId::new("ns", "example.com/v1alpha1", "Widget", "w");
    fake.seed(id.to_object().unwrap());

    let manifest = "apiVersion: example.com/v1\nkind: Widget\nmetadata:\n  name: w\n";
    let next = rec.update(&id, manifest, TIMEOUT).await.unwrap();
    assert_eq!(next.group_version, "example.com/v1");
}

#[tokio::test(start_paused = true)]
async fn update_refuses_identity_changes() {
    let fake = Arc::new(FakeCluster::default());
    let rec = Reconciler::new(fake.clone(), fast_config());
    let id = ResourceId::new("ns", "apps/v1", "Deployment", "web");

    let renamed = DEPLOYMENT.replace("name: web", "name: api");
    let err = rec.update(&id, &renamed, TIMEOUT).await.unwrap_err();
    match err {
        SettleError::IdentityMismatch { field, current, requested } => {
            assert_eq!(field, "name");
            assert_eq!(current, "web");
            assert_eq!(requested, "api");
        }
        other => panic!("unexpected error: {}", other),
    }

    let moved = DEPLOYMENT.replace("name: web", "name: web\n  namespace: other");
    let err = rec.update(&id, &moved, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, SettleError::IdentityMismatch { field: "namespace", .. }), "{}", err);
    assert!(fake.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn update_refuses_group_and_kind_changes() {
    let fake = Arc::new(FakeCluster::default());
    let rec = Reconciler::new(fake.clone(), fast_config());
    let id = ResourceId::new("ns", "apps/v1", "Deployment", "web");

    let regrouped = DEPLOYMENT.replace("apiVersion: apps/v1", "apiVersion: extensions/v1beta1");
    match rec.update(&id, &regrouped, TIMEOUT).await.unwrap_err() {
        SettleError::IdentityMismatch { field, current, requested } => {
            assert_eq!(field, "group");
            assert_eq!(current, "apps");
            assert_eq!(requested, "extensions");
        }
        other => panic!("unexpected error: {}", other),
    }

    let rekinded = DEPLOYMENT.replace("kind: Deployment", "kind: StatefulSet");
    match rec.update(&id, &rekinded, TIMEOUT).await.unwrap_err() {
        SettleError::IdentityMismatch { field, current, requested } => {
            assert_eq!(field, "kind");
            assert_eq!(current, "Deployment");
            assert_eq!(requested, "StatefulSet");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(fake.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn update_waits_through_pending_statuses() {
    let fake = Arc::new(FakeCluster::default());
    let rec = Reconciler::new(fake.clone(), fast_config());
    let id = ResourceId::new("ns", "apps/v1", "Deployment", "web");
    fake.seed(id.to_object().unwrap());
    fake.state.lock().unwrap().statuses = vec![json!({}), json!({ "readyReplicas": 0 }), json!({ "readyReplicas": 5 })].into();

    let scaled = DEPLOYMENT.replace("replicas: 2", "replicas: 5");
    let next = rec.update(&id, &scaled, TIMEOUT).await.unwrap();
    assert_eq!(next, id);
    assert_eq!(fake.count("update"), 1);
    assert_eq!(fake.count("get"), 3);
}

#[tokio::test(start_paused = true)]
async fn update_times_out_with_last_state() {
    let fake = Arc::new(FakeCluster::default());
    let mut cfg = fast_config();
    cfg.poll.min_interval = Duration::from_secs(5);
    let rec = Reconciler::new(fake.clone(), cfg);
    let id = ResourceId::new("ns", "apps/v1", "Deployment", "web");
    fake.seed(id.to_object().unwrap());
    fake.state.lock().unwrap().statuses = vec![json!({ "readyReplicas": 0 })].into();

    let err = rec.update(&id, DEPLOYMENT, Duration::from_secs(8)).await.unwrap_err();
    match err {
        SettleError::ConvergenceTimeout { subject, last_state, .. } => {
            assert_eq!(subject, "ns::apps/v1::Deployment::web");
            assert_eq!(last_state.as_deref(), Some("pending"));
        }
        other => panic!("unexpected error: {}", other),
    }
    // the write itself went through before the wait gave up
    let stored = fake.stored("Deployment/ns/web").unwrap();
    assert_eq!(stored.as_map()["spec"]["replicas"], json!(2));
    assert_eq!(fake.count("get"), 2);
}

#[tokio::test(start_paused = true)]
async fn delete_waits_until_gone() {
    let fake = Arc::new(FakeCluster::default());
    let rec = Reconciler::new(fake.clone(), fast_config());
    let id = rec.create("ns", CONFIGMAP, TIMEOUT).await.unwrap();
    fake.state.lock().unwrap().linger_gets = 2;

    rec.delete(&id, TIMEOUT).await.unwrap();
    assert!(fake.stored("ConfigMap/ns/cfg").is_none());
    // one read during create, then two lingering reads and the not-found one
    assert_eq!(fake.count("get"), 4);
}

#[tokio::test(start_paused = true)]
async fn delete_of_vanished_object_settles_immediately() {
    let fake = Arc::new(FakeCluster::default());
    let rec = Reconciler::new(fake.clone(), fast_config());
    let id = rec.create("ns", CONFIGMAP, TIMEOUT).await.unwrap();
    rec.delete(&id, TIMEOUT).await.unwrap();
    assert_eq!(fake.calls().last().map(String::as_str), Some("get ConfigMap/ns/cfg"));
    assert_eq!(fake.count("get"), 2);
}

#[tokio::test(start_paused = true)]
async fn delete_surfaces_unexpected_read_errors() {
    let fake = Arc::new(FakeCluster::default());
    let rec = Reconciler::new(fake.clone(), fast_config());
    let id = rec.create("ns", CONFIGMAP, TIMEOUT).await.unwrap();
    fake.state.lock().unwrap().fail_get = Some(500);

    let err = rec.delete(&id, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, SettleError::Convergence { .. }), "{}", err);
    assert!(!err.is_not_found());
}

#[tokio::test(start_paused = true)]
async fn reconciler_works_behind_a_trait_object() {
    let fake: Arc<dyn ClusterClient> = Arc::new(FakeCluster::default());
    let rec: Reconciler<dyn ClusterClient> = Reconciler::new(fake, fast_config());
    let id = rec.create("ns", CONFIGMAP, TIMEOUT).await.unwrap();
    assert_eq!(rec.read(&id).await.unwrap().name().unwrap(), "cfg");
}
