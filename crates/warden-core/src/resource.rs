//! Resources and the actions performed on them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Category of a protected resource.
///
/// The known categories route to dedicated policy packages; anything else is
/// carried through as [`ResourceType::Other`] and handled by the generic
/// fallback package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceType {
    /// A dataset (tables, files, query endpoints).
    Dataset,
    /// A processing pipeline.
    Pipeline,
    /// A message-bus topic.
    Topic,
    /// Per-user data.
    UserData,
    /// Any other resource category.
    Other(String),
}

impl ResourceType {
    /// Wire name of the resource type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Dataset => "dataset",
            Self::Pipeline => "pipeline",
            Self::Topic => "topic",
            Self::UserData => "userdata",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for ResourceType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "dataset" => Self::Dataset,
            "pipeline" => Self::Pipeline,
            "topic" => Self::Topic,
            "userdata" => Self::UserData,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for ResourceType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<ResourceType> for String {
    fn from(value: ResourceType) -> Self {
        match value {
            ResourceType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protected resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource category.
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// Identifier within the category (dataset id, topic name, ...).
    pub id: String,
    /// Free-form attributes visible to policies.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Resource {
    /// Creates a resource without attributes.
    pub fn new(resource_type: impl Into<ResourceType>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            attributes: Map::new(),
        }
    }

    /// Adds one attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// The operation requested on a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action name, e.g. `read`, `write`, `subscribe`.
    pub name: String,
    /// Action-specific context (e.g. a target state for a transition).
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl Action {
    /// Creates an action without context.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: Map::new(),
        }
    }

    /// Adds one context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}
