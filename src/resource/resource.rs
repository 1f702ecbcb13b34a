//! The resource entity recorded in snapshots.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::property::PropertyMap;
use super::tokens::{Moniker, ResourceId, TypeToken};

/// A single managed resource.
///
/// `inputs` are the checked properties the resource was declared with;
/// `outputs` are the computed properties returned by the provider on create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource type token.
    #[serde(rename = "type")]
    pub type_token: TypeToken,
    /// Stable logical identity.
    pub moniker: Moniker,
    /// Provider-assigned ID, present once the resource exists remotely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ResourceId>,
    /// Declared input properties.
    #[serde(rename = "properties", default)]
    pub inputs: PropertyMap,
    /// Computed output properties.
    #[serde(default, skip_serializing_if = "PropertyMap::is_empty")]
    pub outputs: PropertyMap,
}

impl Resource {
    /// Creates a resource that does not exist remotely yet.
    #[must_use]
    pub fn new(type_token: TypeToken, moniker: Moniker, inputs: PropertyMap) -> Self {
        Self {
            type_token,
            moniker,
            id: None,
            inputs,
            outputs: PropertyMap::new(),
        }
    }

    /// Sets the provider ID.
    #[must_use]
    pub fn with_id(mut self, id: ResourceId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the computed outputs.
    #[must_use]
    pub fn with_outputs(mut self, outputs: PropertyMap) -> Self {
        self.outputs = outputs;
        self
    }

    /// Merged view of the resource's state: outputs laid over inputs.
    #[must_use]
    pub fn properties(&self) -> PropertyMap {
        if self.outputs.is_empty() {
            return self.inputs.clone();
        }
        self.inputs.overlay(&self.outputs)
    }

    /// Monikers of every resource this one references.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<Moniker> {
        let mut deps = self.inputs.references();
        deps.extend(self.outputs.references());
        deps
    }

    /// Returns true once the provider has assigned an ID.
    #[must_use]
    pub const fn is_created(&self) -> bool {
        self.id.is_some()
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.moniker)?;
        if let Some(id) = &self.id {
            write!(f, " [id={id}]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::PropertyValue;

    fn bucket() -> Resource {
        Resource::new(
            TypeToken::from("aws:s3/bucket:Bucket"),
            Moniker::from("prod::aws:s3/bucket:Bucket::assets"),
            PropertyMap::new().with("acl", "private"),
        )
    }

    #[test]
    fn test_properties_overlay_outputs() {
        let resource = bucket()
            .with_id(ResourceId::from("assets-123"))
            .with_outputs(PropertyMap::new().with("arn", "arn:aws:s3:::assets-123"));
        let props = resource.properties();
        assert_eq!(props.stable_keys(), vec!["acl", "arn"]);
        assert!(resource.is_created());
        assert_eq!(resource.to_string(), "prod::aws:s3/bucket:Bucket::assets [id=assets-123]");
    }

    #[test]
    fn test_dependencies_are_deep() {
        let resource = Resource::new(
            TypeToken::from("aws:s3/object:Object"),
            Moniker::from("prod::aws:s3/object:Object::logo"),
            PropertyMap::new().with(
                "grants",
                vec![PropertyValue::Object(
                    PropertyMap::new().with("bucket", Moniker::from("b1")),
                )],
            ),
        );
        let deps: Vec<String> = resource.dependencies().iter().map(ToString::to_string).collect();
        assert_eq!(deps, vec!["b1"]);
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(bucket()).expect("serialize");
        assert_eq!(json["type"], "aws:s3/bucket:Bucket");
        assert_eq!(json["properties"]["acl"], "private");
        assert!(json.get("id").is_none());
        assert!(json.get("outputs").is_none());

        let parsed: Resource = serde_json::from_value(json).expect("deserialize");
        assert_eq!(parsed, bucket());
    }
}
