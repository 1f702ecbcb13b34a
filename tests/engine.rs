//! End-to-end runs of the engine: build, plan, apply and persist against a
//! scripted in-memory provider and a local state store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use husk::diag::Diagnostics;
use husk::error::{HuskError, ProviderError};
use husk::planner::{ApplyProgress, StepOp};
use husk::provider::{CheckFailure, CheckResult, CreateResult, Provider, ProviderRegistry};
use husk::reconciler::{ApplyOptions, Reconciler};
use husk::resource::{
    GraphNode, Moniker, ObjectDiff, PropertyKey, PropertyMap, PropertyValue, ResourceId, TargetGraph, TypeToken,
};
use husk::state::{DeploymentOperation, Encoding, LocalStateStore, StateStore};
use tempfile::TempDir;

const BUCKET: &str = "cloud:storage:Bucket";
const OBJECT: &str = "cloud:storage:Object";

/// Remote world kept by the scripted provider.
#[derive(Default)]
struct World {
    next_id: usize,
    live: BTreeMap<String, PropertyMap>,
    calls: Vec<String>,
    fail_create: Option<(String, bool)>,
    link_outputs: bool,
}

/// Provider backed by an in-memory map; `region` changes force replacement.
#[derive(Clone, Default)]
struct ScriptedProvider {
    world: Arc<Mutex<World>>,
}

impl ScriptedProvider {
    fn calls(&self) -> Vec<String> {
        self.world.lock().unwrap().calls.clone()
    }

    fn clear_calls(&self) {
        self.world.lock().unwrap().calls.clear();
    }

    fn live(&self) -> usize {
        self.world.lock().unwrap().live.len()
    }

    /// Makes buckets report links to themselves and to the `index` object.
    fn link_outputs(&self) {
        self.world.lock().unwrap().link_outputs = true;
    }

    /// Makes the next create of `name` fail; `unknown` leaves remote state unknown.
    fn fail_create(&self, name: &str, unknown: bool) {
        self.world.lock().unwrap().fail_create = Some((name.to_string(), unknown));
    }
}

fn label(properties: &PropertyMap) -> String {
    properties
        .get("name")
        .and_then(PropertyValue::as_str)
        .unwrap_or("unnamed")
        .to_string()
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn check(&self, _type_token: &TypeToken, properties: &PropertyMap) -> Result<CheckResult, ProviderError> {
        if properties.get("size").and_then(PropertyValue::as_number).is_some_and(|s| s < 0.0) {
            return Ok(CheckResult {
                properties: properties.clone(),
                failures: vec![CheckFailure::new("size", "must not be negative")],
            });
        }
        Ok(CheckResult::ok(properties.clone()))
    }

    async fn name(&self, _type_token: &TypeToken, properties: &PropertyMap) -> Result<String, ProviderError> {
        Ok(label(properties))
    }

    async fn create(&self, type_token: &TypeToken, properties: &PropertyMap) -> Result<CreateResult, ProviderError> {
        let mut world = self.world.lock().unwrap();
        let name = label(properties);
        world.calls.push(format!("create {name}"));

        if let Some((failing, unknown)) = world.fail_create.take() {
            if failing == name {
                return Err(if unknown {
                    ProviderError::unknown("connection reset")
                } else {
                    ProviderError::recovered("quota exceeded")
                });
            }
            world.fail_create = Some((failing, unknown));
        }

        world.next_id += 1;
        let id = format!("{name}-{}", world.next_id);
        world.live.insert(id.clone(), properties.clone());
        let mut outputs = PropertyMap::new().with("url", format!("mem://{id}"));
        if world.link_outputs && type_token.as_str() == BUCKET {
            outputs = outputs
                .with("self_link", Moniker::new("web", type_token, &name))
                .with("index", Moniker::new("web", &TypeToken::from(OBJECT), "index"));
        }
        Ok(CreateResult {
            id: ResourceId::new(id.as_str()),
            outputs,
        })
    }

    async fn get(&self, _type_token: &TypeToken, id: &ResourceId) -> Result<PropertyMap, ProviderError> {
        self.world
            .lock()
            .unwrap()
            .live
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| ProviderError::recovered(format!("{id} not found")))
    }

    async fn inspect_change(
        &self,
        _type_token: &TypeToken,
        _id: &ResourceId,
        _olds: &PropertyMap,
        _news: &PropertyMap,
        diff: &ObjectDiff,
    ) -> Result<Vec<PropertyKey>, ProviderError> {
        Ok(diff
            .changed_keys()
            .into_iter()
            .filter(|key| *key == "region")
            .map(ToString::to_string)
            .collect())
    }

    async fn update(
        &self,
        _type_token: &TypeToken,
        id: &ResourceId,
        _olds: &PropertyMap,
        news: &PropertyMap,
        _diff: &ObjectDiff,
    ) -> Result<(), ProviderError> {
        let mut world = self.world.lock().unwrap();
        world.calls.push(format!("update {}", label(news)));
        world.live.insert(id.to_string(), news.clone());
        Ok(())
    }

    async fn delete(&self, _type_token: &TypeToken, id: &ResourceId) -> Result<(), ProviderError> {
        let mut world = self.world.lock().unwrap();
        let removed = world.live.remove(id.as_str());
        let name = removed.as_ref().map_or_else(|| id.to_string(), label);
        world.calls.push(format!("delete {name}"));
        Ok(())
    }
}

struct Fixture {
    _dir: TempDir,
    store: LocalStateStore,
    registry: ProviderRegistry,
    provider: ScriptedProvider,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = LocalStateStore::new(dir.path());
    let provider = ScriptedProvider::default();
    let mut registry = ProviderRegistry::new();
    registry.register_package("cloud", Arc::new(provider.clone()));
    Fixture {
        _dir: dir,
        store,
        registry,
        provider,
    }
}

fn bucket(region: &str) -> GraphNode {
    GraphNode::new(
        "bucket",
        TypeToken::from(BUCKET),
        PropertyMap::new().with("name", "assets").with("region", region),
    )
}

fn object(key: &str, body: &str) -> GraphNode {
    GraphNode::new(
        key,
        TypeToken::from(OBJECT),
        PropertyMap::new()
            .with("name", key)
            .with("body", body)
            .with("bucket", Moniker::from("bucket")),
    )
}

fn graph(nodes: Vec<GraphNode>) -> TargetGraph {
    TargetGraph {
        args: PropertyMap::new().with("stage", "test"),
        resources: nodes,
    }
}

async fn deploy(fx: &Fixture, target: &TargetGraph) -> Result<husk::reconciler::ApplyReport, HuskError> {
    let mut diag = Diagnostics::new();
    let mut progress = ApplyProgress::new();
    Reconciler::new(&fx.store, &fx.registry)
        .deploy("web", target, ApplyOptions::default(), &mut diag, &mut progress)
        .await
}

#[tokio::test]
async fn test_first_deploy_creates_in_dependency_order() {
    let fx = fixture();
    let reconciler = Reconciler::new(&fx.store, &fx.registry);
    reconciler.init("web").await.unwrap();

    // Declared dependent first; the snapshot must still create the bucket first.
    let target = graph(vec![object("index", "hello"), bucket("eu")]);
    let report = deploy(&fx, &target).await.unwrap();

    assert!(report.applied);
    assert_eq!(report.summary.creates, 2);
    assert_eq!(fx.provider.calls(), vec!["create assets", "create index"]);

    let record = reconciler.load("web").await.unwrap();
    assert_eq!(record.resource_count(), 2);
    assert_eq!(record.latest.resources()[0].moniker.name(), "assets");
    let index = &record.latest.resources()[1];
    assert!(index.id.is_some());
    assert!(index.outputs.get("url").is_some());
    assert_eq!(
        index.inputs.get("bucket").and_then(PropertyValue::as_resource),
        Some(&record.latest.resources()[0].moniker)
    );
    assert_eq!(record.args.get("stage").and_then(PropertyValue::as_str), Some("test"));
}

#[tokio::test]
async fn test_redeploy_is_a_noop() {
    let fx = fixture();
    let reconciler = Reconciler::new(&fx.store, &fx.registry);
    reconciler.init("web").await.unwrap();
    let target = graph(vec![bucket("eu"), object("index", "hello")]);

    let first = deploy(&fx, &target).await.unwrap();
    fx.provider.clear_calls();
    let second = deploy(&fx, &target).await.unwrap();

    assert!(fx.provider.calls().is_empty());
    assert_eq!(second.summary.changes(), 0);
    assert_eq!(second.summary.unchanged, 2);
    assert_eq!(first.snapshot_hash, second.snapshot_hash);

    let preview = reconciler
        .preview("web", &target, &mut Diagnostics::new())
        .await
        .unwrap();
    assert!(preview.plan.is_empty());
    assert_eq!(preview.deployment.history.len(), 2);
}

#[tokio::test]
async fn test_update_and_replace() {
    let fx = fixture();
    Reconciler::new(&fx.store, &fx.registry).init("web").await.unwrap();
    deploy(&fx, &graph(vec![bucket("eu"), object("index", "hello")]))
        .await
        .unwrap();
    let old_bucket_id = fx.store.load("web").await.unwrap().unwrap().latest.resources()[0]
        .id
        .clone();
    fx.provider.clear_calls();

    let report = deploy(&fx, &graph(vec![bucket("us"), object("index", "bye")]))
        .await
        .unwrap();

    assert_eq!(report.summary.replaces, 1);
    assert_eq!(report.summary.updates, 1);
    let calls = fx.provider.calls();
    assert_eq!(calls.first().map(String::as_str), Some("create assets"));
    assert_eq!(calls.last().map(String::as_str), Some("delete assets"));
    assert!(calls.contains(&"update index".to_string()));
    assert_eq!(fx.provider.live(), 2);

    let record = fx.store.load("web").await.unwrap().unwrap();
    assert_eq!(record.resource_count(), 2);
    let new_bucket = &record.latest.resources()[0];
    assert_ne!(new_bucket.id, old_bucket_id);
    assert_eq!(new_bucket.inputs.get("region").and_then(PropertyValue::as_str), Some("us"));
}

#[tokio::test]
async fn test_removed_resources_are_deleted_dependents_first() {
    let fx = fixture();
    let reconciler = Reconciler::new(&fx.store, &fx.registry);
    reconciler.init("web").await.unwrap();
    deploy(&fx, &graph(vec![bucket("eu"), object("a", "1"), object("b", "2")]))
        .await
        .unwrap();
    fx.provider.clear_calls();

    let report = deploy(&fx, &graph(vec![bucket("eu"), object("a", "1")])).await.unwrap();
    assert_eq!(report.summary.deletes, 1);
    assert_eq!(fx.provider.calls(), vec!["delete b"]);

    fx.provider.clear_calls();
    let mut progress = ApplyProgress::new();
    let report = reconciler
        .destroy("web", ApplyOptions::default(), &mut progress)
        .await
        .unwrap();

    assert_eq!(report.operation, DeploymentOperation::Destroy);
    assert_eq!(fx.provider.calls(), vec!["delete a", "delete assets"]);
    assert_eq!(progress.succeeded(StepOp::Delete), 2);
    assert_eq!(fx.provider.live(), 0);
    assert!(!fx.store.exists("web").await.unwrap());
}

#[tokio::test]
async fn test_recovered_failure_keeps_progress_and_resumes() {
    let fx = fixture();
    Reconciler::new(&fx.store, &fx.registry).init("web").await.unwrap();
    let target = graph(vec![bucket("eu"), object("index", "hello")]);

    fx.provider.fail_create("index", false);
    let err = deploy(&fx, &target).await.unwrap_err();
    assert!(matches!(err, HuskError::Apply(_)));
    assert!(!err.is_maybe_corrupt());

    let record = fx.store.load("web").await.unwrap().unwrap();
    assert_eq!(record.resource_count(), 1);
    let entry = record.last_entry().unwrap();
    assert!(!entry.success);
    assert!(!entry.maybe_corrupt);
    assert_eq!(entry.completed, 1);
    assert!(!fx.store.is_locked("web").await.unwrap());

    fx.provider.clear_calls();
    let report = deploy(&fx, &target).await.unwrap();
    assert_eq!(report.summary.creates, 1);
    assert_eq!(fx.provider.calls(), vec!["create index"]);
}

#[tokio::test]
async fn test_unknown_failure_is_flagged() {
    let fx = fixture();
    Reconciler::new(&fx.store, &fx.registry).init("web").await.unwrap();

    fx.provider.fail_create("assets", true);
    let err = deploy(&fx, &graph(vec![bucket("eu")])).await.unwrap_err();
    assert!(err.is_maybe_corrupt());

    let record = fx.store.load("web").await.unwrap().unwrap();
    assert!(record.latest.is_empty());
    assert!(record.last_entry().unwrap().maybe_corrupt);
}

#[tokio::test]
async fn test_validation_failures_are_collected() {
    let fx = fixture();
    Reconciler::new(&fx.store, &fx.registry).init("web").await.unwrap();

    let mut bad = bucket("eu");
    bad.properties = bad.properties.with("size", -1);
    let mut also_bad = object("index", "x");
    also_bad.properties = also_bad.properties.with("size", -2);

    let mut diag = Diagnostics::new();
    let mut progress = ApplyProgress::new();
    let result = Reconciler::new(&fx.store, &fx.registry)
        .deploy("web", &graph(vec![bad, also_bad]), ApplyOptions::default(), &mut diag, &mut progress)
        .await;

    assert!(result.is_err());
    assert_eq!(diag.error_count(), 2);
    assert!(fx.provider.calls().is_empty());
    assert!(fx.store.load("web").await.unwrap().unwrap().history.is_empty());
}

#[tokio::test]
async fn test_yaml_records_keep_references() {
    let dir = TempDir::new().unwrap();
    let store = LocalStateStore::new(dir.path()).with_encoding(Encoding::Yaml);
    let provider = ScriptedProvider::default();
    let mut registry = ProviderRegistry::new();
    registry.register_package("cloud", Arc::new(provider));

    let reconciler = Reconciler::new(&store, &registry);
    reconciler.init("web").await.unwrap();
    reconciler
        .deploy(
            "web",
            &graph(vec![bucket("eu"), object("index", "hello")]),
            ApplyOptions::default(),
            &mut Diagnostics::new(),
            &mut ApplyProgress::new(),
        )
        .await
        .unwrap();

    assert!(dir.path().join("husks").join("web.yaml").exists());
    let record = store.load("web").await.unwrap().unwrap();
    let bucket_moniker = &record.latest.resources()[0].moniker;
    assert_eq!(
        record.latest.resources()[1].inputs.get("bucket").and_then(PropertyValue::as_resource),
        Some(bucket_moniker)
    );
}

#[tokio::test]
async fn test_outputs_linking_back_are_recorded() {
    let fx = fixture();
    fx.provider.link_outputs();
    let reconciler = Reconciler::new(&fx.store, &fx.registry);
    reconciler.init("web").await.unwrap();
    let target = graph(vec![bucket("eu"), object("index", "hello")]);

    let report = deploy(&fx, &target).await.unwrap();
    assert!(report.applied);

    let record = fx.store.load("web").await.unwrap().unwrap();
    assert_eq!(record.resource_count(), 2);
    let assets = &record.latest.resources()[0];
    assert_eq!(
        assets.outputs.get("self_link").and_then(PropertyValue::as_resource),
        Some(&assets.moniker)
    );
    assert!(record.last_entry().unwrap().success);

    fx.provider.clear_calls();
    let again = deploy(&fx, &target).await.unwrap();
    assert_eq!(again.summary.changes(), 0);
    assert!(fx.provider.calls().is_empty());
}

#[tokio::test]
async fn test_failed_deploy_with_linked_outputs_keeps_checkpoint() {
    let fx = fixture();
    fx.provider.link_outputs();
    Reconciler::new(&fx.store, &fx.registry).init("web").await.unwrap();
    let target = graph(vec![bucket("eu"), object("index", "hello")]);

    fx.provider.fail_create("index", false);
    let err = deploy(&fx, &target).await.unwrap_err();
    assert!(matches!(err, HuskError::Apply(_)));

    let record = fx.store.load("web").await.unwrap().unwrap();
    assert_eq!(record.resource_count(), 1);
    assert!(!record.last_entry().unwrap().success);
    assert!(!fx.store.is_locked("web").await.unwrap());

    fx.provider.clear_calls();
    deploy(&fx, &target).await.unwrap();
    assert_eq!(fx.provider.calls(), vec!["create index"]);
    assert_eq!(fx.store.load("web").await.unwrap().unwrap().resource_count(), 2);
}
