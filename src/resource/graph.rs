//! Target graphs and their conversion into snapshots.
//!
//! A [`TargetGraph`] is the evaluated desired state of a husk: an unordered
//! list of nodes whose references name other nodes by key. The
//! [`SnapshotBuilder`] validates every node through its provider, mints
//! monikers, rewrites key references into moniker references and sorts the
//! result into dependency order.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::property::PropertyMap;
use super::resource::Resource;
use super::snapshot::Snapshot;
use super::tokens::{Moniker, TypeToken};
use crate::diag::Diagnostics;
use crate::error::{ConfigError, GraphError, HuskError, PlanError, Result};
use crate::provider::ProviderRegistry;
use crate::state::Encoding;

/// Evaluated desired state of a husk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetGraph {
    /// Arguments the graph was evaluated with, recorded with the deployment.
    #[serde(default)]
    pub args: PropertyMap,
    /// Unordered resource declarations.
    #[serde(default)]
    pub resources: Vec<GraphNode>,
}

/// One declared resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Key other nodes use to reference this one.
    pub key: String,
    /// Resource type token.
    #[serde(rename = "type")]
    pub type_token: TypeToken,
    /// Explicit logical name; the provider names the resource otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Candidate input properties.
    #[serde(default)]
    pub properties: PropertyMap,
}

impl TargetGraph {
    /// Reads a target graph document, picking the encoding by extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable or malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading target graph from: {}", path.display());

        if !path.exists() {
            return Err(HuskError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let encoding = Encoding::from_path(path)?;
        let content = std::fs::read_to_string(path)?;
        let graph: Self = encoding.unmarshal(&content).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
            location: Some(path.display().to_string()),
        })?;

        debug!("Target graph declares {} resources", graph.resources.len());
        Ok(graph)
    }
}

impl GraphNode {
    /// Creates a node without an explicit name.
    #[must_use]
    pub fn new(key: impl Into<String>, type_token: TypeToken, properties: PropertyMap) -> Self {
        Self {
            key: key.into(),
            type_token,
            name: None,
            properties,
        }
    }

    /// Sets an explicit logical name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Builds snapshots for one husk.
#[derive(Debug)]
pub struct SnapshotBuilder<'a> {
    husk: &'a str,
    registry: &'a ProviderRegistry,
}

impl<'a> SnapshotBuilder<'a> {
    /// Creates a builder minting monikers inside `husk`.
    #[must_use]
    pub const fn new(husk: &'a str, registry: &'a ProviderRegistry) -> Self {
        Self { husk, registry }
    }

    /// Turns a target graph into a snapshot.
    ///
    /// Every node is checked even after a failure so that all validation
    /// problems land in `diag` at once.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::ValidationFailed`] if any node failed checking,
    /// and a [`GraphError`] for duplicate keys, unknown references, name
    /// collisions and cycles.
    pub async fn build(&self, graph: &TargetGraph, diag: &mut Diagnostics) -> Result<Snapshot> {
        let mut keys = HashSet::with_capacity(graph.resources.len());
        for node in &graph.resources {
            if !keys.insert(node.key.as_str()) {
                return Err(GraphError::DuplicateKey {
                    key: node.key.clone(),
                }
                .into());
            }
        }

        let mut failures = 0;
        let mut checked = Vec::with_capacity(graph.resources.len());
        for node in &graph.resources {
            match self.check_node(node, diag).await {
                Ok((moniker, properties)) => checked.push((node, moniker, properties)),
                Err(count) => failures += count,
            }
        }

        if failures > 0 {
            return Err(PlanError::ValidationFailed { failures }.into());
        }

        let monikers: HashMap<String, Moniker> = checked
            .iter()
            .map(|(node, moniker, _)| (node.key.clone(), moniker.clone()))
            .collect();

        let mut resources = Vec::with_capacity(checked.len());
        for (node, moniker, properties) in checked {
            let inputs = properties.try_map_references(&mut |target| {
                monikers
                    .get(target.as_str())
                    .cloned()
                    .ok_or_else(|| GraphError::UnknownReference {
                        from: node.key.clone(),
                        to: target.to_string(),
                    })
            })?;
            resources.push(Resource::new(node.type_token.clone(), moniker, inputs));
        }

        let snapshot = Snapshot::from_unordered(resources)?;
        debug!(husk = self.husk, "Built target snapshot with {} resources", snapshot.len());
        Ok(snapshot)
    }

    /// Checks and names one node; on failure returns how many problems were
    /// reported.
    async fn check_node(
        &self,
        node: &GraphNode,
        diag: &mut Diagnostics,
    ) -> std::result::Result<(Moniker, PropertyMap), usize> {
        let subject = Some(node.key.as_str());

        if let Err(e) = node.type_token.validate() {
            diag.error(subject, e.to_string());
            return Err(1);
        }

        let non_finite = node.properties.non_finite_paths();
        if !non_finite.is_empty() {
            for path in &non_finite {
                diag.error(subject, format!("property '{path}' is not a finite number"));
            }
            return Err(non_finite.len());
        }

        let provider = match self.registry.resolve(&node.type_token) {
            Ok(provider) => provider,
            Err(e) => {
                diag.error(subject, e.to_string());
                return Err(1);
            }
        };

        let result = match provider.check(&node.type_token, &node.properties).await {
            Ok(result) => result,
            Err(e) => {
                diag.error(subject, format!("check failed: {e}"));
                return Err(1);
            }
        };

        if !result.is_ok() {
            for failure in &result.failures {
                diag.error(subject, failure.to_string());
            }
            return Err(result.failures.len());
        }

        let non_finite = result.properties.non_finite_paths();
        if !non_finite.is_empty() {
            for path in &non_finite {
                diag.error(subject, format!("checked property '{path}' is not a finite number"));
            }
            return Err(non_finite.len());
        }

        let name = match &node.name {
            Some(name) => name.clone(),
            None => match provider.name(&node.type_token, &result.properties).await {
                Ok(name) => name,
                Err(e) => {
                    diag.error(subject, format!("name failed: {e}"));
                    return Err(1);
                }
            },
        };

        if name.is_empty() || name.contains("::") {
            diag.error(subject, format!("invalid resource name '{name}'"));
            return Err(1);
        }

        Ok((Moniker::new(self.husk, &node.type_token, &name), result.properties))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::ProviderError;
    use crate::provider::{CheckFailure, CheckResult, MockProvider};

    fn bucket_type() -> TypeToken {
        TypeToken::from("aws:s3/bucket:Bucket")
    }

    fn object_type() -> TypeToken {
        TypeToken::from("aws:s3/object:Object")
    }

    fn passthrough_provider() -> MockProvider {
        let mut provider = MockProvider::new();
        provider
            .expect_check()
            .returning(|_, props| Ok(CheckResult::ok(props.clone())));
        provider.expect_name().returning(|_, props| {
            Ok(props
                .get("key")
                .and_then(|v| v.as_str())
                .unwrap_or("unnamed")
                .to_string())
        });
        provider
    }

    fn registry(provider: MockProvider) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register_package("aws", Arc::new(provider));
        registry
    }

    #[tokio::test]
    async fn test_build_mints_monikers_and_orders() {
        let graph = TargetGraph {
            args: PropertyMap::new(),
            resources: vec![
                GraphNode::new(
                    "logo",
                    object_type(),
                    PropertyMap::new()
                        .with("key", "logo.png")
                        .with("bucket", Moniker::from("assets")),
                ),
                GraphNode::new("assets", bucket_type(), PropertyMap::new()).named("assets"),
            ],
        };
        let registry = registry(passthrough_provider());
        let mut diag = Diagnostics::new();

        let snapshot = SnapshotBuilder::new("prod", &registry)
            .build(&graph, &mut diag)
            .await
            .expect("build");

        let monikers: Vec<&str> = snapshot.iter().map(|r| r.moniker.as_str()).collect();
        assert_eq!(
            monikers,
            vec!["prod::aws:s3/bucket:Bucket::assets", "prod::aws:s3/object:Object::logo.png"]
        );
        let object = &snapshot.resources()[1];
        assert_eq!(
            object.inputs.get("bucket").and_then(|v| v.as_resource()),
            Some(&Moniker::from("prod::aws:s3/bucket:Bucket::assets"))
        );
        assert!(diag.success());
    }

    #[tokio::test]
    async fn test_all_check_failures_are_collected() {
        let mut provider = MockProvider::new();
        provider.expect_check().returning(|_, _| {
            Ok(CheckResult {
                properties: PropertyMap::new(),
                failures: vec![
                    CheckFailure::new("key", "required"),
                    CheckFailure::new("acl", "unknown value"),
                ],
            })
        });
        provider.expect_name().never();
        let registry = registry(provider);

        let graph = TargetGraph {
            args: PropertyMap::new(),
            resources: vec![
                GraphNode::new("a", object_type(), PropertyMap::new()),
                GraphNode::new("b", object_type(), PropertyMap::new()),
            ],
        };
        let mut diag = Diagnostics::new();
        let err = SnapshotBuilder::new("prod", &registry)
            .build(&graph, &mut diag)
            .await
            .unwrap_err();

        assert!(matches!(err, HuskError::Plan(PlanError::ValidationFailed { failures: 4 })));
        assert_eq!(diag.error_count(), 4);
    }

    #[tokio::test]
    async fn test_unknown_provider_and_check_error_are_reported() {
        let mut provider = MockProvider::new();
        provider
            .expect_check()
            .returning(|_, _| Err(ProviderError::recovered("endpoint down")));
        let registry = registry(provider);

        let graph = TargetGraph {
            args: PropertyMap::new(),
            resources: vec![
                GraphNode::new("a", object_type(), PropertyMap::new()),
                GraphNode::new("b", TypeToken::from("gcp:storage:Bucket"), PropertyMap::new()),
            ],
        };
        let mut diag = Diagnostics::new();
        let err = SnapshotBuilder::new("prod", &registry)
            .build(&graph, &mut diag)
            .await
            .unwrap_err();

        assert!(matches!(err, HuskError::Plan(PlanError::ValidationFailed { failures: 2 })));
        assert_eq!(diag.entries()[0].subject.as_deref(), Some("a"));
        assert_eq!(diag.entries()[1].subject.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_reference_to_missing_key() {
        let registry = registry(passthrough_provider());
        let graph = TargetGraph {
            args: PropertyMap::new(),
            resources: vec![GraphNode::new(
                "logo",
                object_type(),
                PropertyMap::new().with("key", "logo").with("bucket", Moniker::from("nope")),
            )],
        };
        let err = SnapshotBuilder::new("prod", &registry)
            .build(&graph, &mut Diagnostics::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HuskError::Graph(GraphError::UnknownReference { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_keys_and_cycles() {
        let registry = registry(passthrough_provider());
        let duplicate = TargetGraph {
            args: PropertyMap::new(),
            resources: vec![
                GraphNode::new("a", bucket_type(), PropertyMap::new()),
                GraphNode::new("a", bucket_type(), PropertyMap::new()),
            ],
        };
        let err = SnapshotBuilder::new("prod", &registry)
            .build(&duplicate, &mut Diagnostics::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HuskError::Graph(GraphError::DuplicateKey { .. })));

        let cyclic = TargetGraph {
            args: PropertyMap::new(),
            resources: vec![
                GraphNode::new("a", bucket_type(), PropertyMap::new().with("key", "a").with("peer", Moniker::from("b"))),
                GraphNode::new("b", bucket_type(), PropertyMap::new().with("key", "b").with("peer", Moniker::from("a"))),
            ],
        };
        let err = SnapshotBuilder::new("prod", &registry)
            .build(&cyclic, &mut Diagnostics::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HuskError::Graph(GraphError::Cycle { .. })));
    }

    #[tokio::test]
    async fn test_non_finite_numbers_are_rejected() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("graph.yaml");
        std::fs::write(
            &path,
            "resources:\n  - key: assets\n    type: aws:s3/bucket:Bucket\n    name: assets\n    properties:\n      ratio: .nan\n      limits:\n        cpu: -.inf\n        mem: 512\n",
        )
        .expect("write");
        let graph = TargetGraph::load(&path).expect("load");

        let mut provider = MockProvider::new();
        provider.expect_check().never();
        let registry = registry(provider);
        let mut diag = Diagnostics::new();
        let err = SnapshotBuilder::new("prod", &registry)
            .build(&graph, &mut diag)
            .await
            .unwrap_err();

        assert!(matches!(err, HuskError::Plan(PlanError::ValidationFailed { failures: 2 })));
        assert!(diag.entries()[0].message.contains("limits.cpu"));
        assert!(diag.entries()[1].message.contains("ratio"));
    }

    #[tokio::test]
    async fn test_non_finite_checked_inputs_are_rejected() {
        let mut provider = MockProvider::new();
        provider.expect_check().returning(|_, props| {
            Ok(CheckResult::ok(props.clone().with("scale", f64::INFINITY)))
        });
        provider.expect_name().never();
        let registry = registry(provider);

        let graph = TargetGraph {
            args: PropertyMap::new(),
            resources: vec![GraphNode::new("a", bucket_type(), PropertyMap::new())],
        };
        let mut diag = Diagnostics::new();
        let err = SnapshotBuilder::new("prod", &registry)
            .build(&graph, &mut diag)
            .await
            .unwrap_err();
        assert!(matches!(err, HuskError::Plan(PlanError::ValidationFailed { failures: 1 })));
    }

    #[test]
    fn test_load_yaml_document() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("graph.yaml");
        std::fs::write(
            &path,
            "args:\n  region: us-east-1\nresources:\n  - key: assets\n    type: aws:s3/bucket:Bucket\n    name: assets\n  - key: logo\n    type: aws:s3/object:Object\n    properties:\n      bucket: { $ref: assets }\n",
        )
        .expect("write");

        let graph = TargetGraph::load(&path).expect("load");
        assert_eq!(graph.resources.len(), 2);
        assert_eq!(graph.resources[0].name.as_deref(), Some("assets"));
        assert_eq!(
            graph.resources[1].properties.get("bucket").and_then(|v| v.as_resource()),
            Some(&Moniker::from("assets"))
        );
        assert!(TargetGraph::load(dir.path().join("missing.yaml")).is_err());
    }
}
