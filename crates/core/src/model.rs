//! Data model types shared across the workspace.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::Untyped;

/// `(name: "namespace/type", version, config)`. `FullName` is the cache key
/// for the Provider Adapter's per-process map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// `namespace/type`, e.g. `hashicorp/random`.
    pub name: String,
    /// A concrete, non-empty version string, e.g. `3.7.2`.
    pub version: String,
    /// Provider-level configuration block, if any.
    #[serde(default)]
    pub config: Untyped,
}

impl ProviderConfig {
    /// Validates and constructs a provider config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `name` does not contain exactly
    /// one `/` or `version` is empty.
    pub fn new(name: impl Into<String>, version: impl Into<String>, config: Untyped) -> Result<Self> {
        let name = name.into();
        let version = version.into();
        if name.matches('/').count() != 1 {
            return Err(Error::invalid_argument(format!(
                "provider name {name:?} must be of the form namespace/type"
            )));
        }
        if version.is_empty() {
            return Err(Error::invalid_argument("provider version must be non-empty"));
        }
        Ok(Self { name, version, config })
    }

    /// `namespace/type@version`, used as the Provider Adapter cache key.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// The `namespace` half of `name`.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.name.split('/').next().unwrap_or(&self.name)
    }

    /// The `type` half of `name`.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.name.split('/').nth(1).unwrap_or(&self.name)
    }
}

/// `(provider, resources, dataSources, version)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSchema {
    /// Description of the provider's own configuration block.
    pub provider: TypeDescription,
    /// Resource type name → its description.
    pub resources: BTreeMap<String, TypeDescription>,
    /// Data source type name → its description.
    pub data_sources: BTreeMap<String, TypeDescription>,
    /// Provider version this schema was fetched from.
    pub version: String,
}

/// How an attribute may be supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Usage {
    /// Must be supplied by the caller.
    Required,
    /// May be supplied by the caller.
    Optional,
    /// May be supplied by the caller; otherwise computed by the provider.
    OptionalComputed,
    /// Always computed by the provider; cannot be supplied.
    Computed,
    /// Neither required, optional, nor computed — should not occur in a
    /// well-formed schema but is represented rather than rejected.
    Unsupported,
}

/// A single property entry within a [`TypeDescription`]'s `properties` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDescription {
    /// `string | number | boolean | list | set | map | object | unknown`.
    #[serde(rename = "type")]
    pub type_tag: String,
    /// Whether the caller must supply this attribute.
    pub required: bool,
    /// How the attribute may be supplied.
    pub usage: Usage,
    /// Whether the value is sensitive and should be redacted in logs/UI.
    #[serde(default)]
    pub sensitive: bool,
    /// Whether the attribute is deprecated.
    #[serde(default)]
    pub deprecated: bool,
    /// Whether the attribute is write-only (never returned in state).
    #[serde(default)]
    pub write_only: bool,
    /// Human-readable description, if the provider supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Set when the attribute has a nested object type.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nested: bool,
    /// Set for nested blocks (as opposed to attributes).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_block: bool,
    /// Nesting mode label for nested blocks: `single | group | list | set | map`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nesting: Option<String>,
    /// Minimum item count for list/set-nested blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<i64>,
    /// Maximum item count for list/set-nested blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<i64>,
    /// Nested properties, for object-shaped attributes and nested blocks.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyDescription>,
    /// Required property names within `properties`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_properties: Vec<String>,
    /// Recursed nested block descriptions (only populated for blocks with
    /// their own nested blocks).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nested_blocks: BTreeMap<String, PropertyDescription>,
}

/// Human-readable description of a resource, data source, or provider
/// configuration shape, produced by the schema converter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDescription {
    /// Owning provider name, e.g. `hashicorp/random`.
    pub provider_name: String,
    /// Resource or data source type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Human-readable description, if supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Flat map of attribute/block name → description.
    pub properties: BTreeMap<String, PropertyDescription>,
    /// Top-level attribute names that are required (not nested-block-interior).
    pub required: Vec<String>,
}

/// The persisted post-apply state of a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    /// Caller-chosen unique identifier.
    pub resource_id: String,
    /// `namespace/type` of the owning provider.
    pub provider: String,
    /// Provider version the state was produced under.
    pub provider_version: String,
    /// Resource type name.
    pub resource_type: String,
    /// Post-apply state, untyped.
    pub state: Untyped,
    /// Creation timestamp (RFC3339 UTC).
    pub created_at: DateTime<Utc>,
}

/// The kind of relation a [`DependencyEdge`] expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// Declared explicitly by the caller.
    Explicit,
    /// Inferred from configuration references.
    Implicit,
    /// Arises from a data source read.
    DataSource,
}

/// A single `(source, target, description)` field-level mapping used to
/// document why a dependency exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Attribute path on the dependent (`from`) resource.
    pub source: String,
    /// Attribute path on the dependency (`to`) resource.
    pub target: String,
    /// Human-readable explanation.
    pub description: String,
}

/// A directed `from -> to` relation: `from` depends on `to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// The dependent resource id.
    pub from_resource_id: String,
    /// The resource id depended upon.
    pub to_resource_id: String,
    /// The kind of dependency.
    pub dependency_type: DependencyType,
    /// Human-readable explanation of the dependency.
    pub explanation: String,
    /// Field-level mappings documenting the dependency.
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
    /// Creation timestamp (RFC3339 UTC).
    pub created_at: DateTime<Utc>,
}

/// The lifecycle operation kind recorded in [`TimelineEvent`]s and
/// [`ResourceOperation`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Resource was created.
    Create,
    /// Resource was updated.
    Update,
    /// Resource was deleted (provider-invoking).
    Delete,
    /// Resource was imported.
    Import,
    /// State record removed without invoking the provider.
    Eject,
    /// Resource state was refreshed from the provider.
    Refresh,
}

/// An immutable, time-ordered record of a state-changing operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Time-ordered unique identifier.
    pub id: String,
    /// Affected resource, if any (absent for provider-wide events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// The kind of operation.
    pub operation: Operation,
    /// Who or what performed the operation.
    pub changed_by: String,
    /// Creation timestamp (RFC3339 UTC).
    pub created_at: DateTime<Utc>,
}

/// An immutable record of a lifecycle call attempt, including its inputs and
/// final status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceOperation {
    /// Unique identifier.
    pub id: String,
    /// Affected resource id.
    pub resource_id: String,
    /// Resource type name.
    pub resource_type: String,
    /// Owning provider name.
    pub provider: String,
    /// Provider version.
    pub provider_version: String,
    /// The kind of operation attempted.
    pub operation: Operation,
    /// The state prior to this operation, if applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<Untyped>,
    /// The configuration/state proposed for this operation, if applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_state: Option<Untyped>,
    /// Creation timestamp (RFC3339 UTC).
    pub created_at: DateTime<Utc>,
    /// Populated with the error message when the operation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_config_requires_single_slash() {
        assert!(ProviderConfig::new("random", "3.7.2", Untyped::Null).is_err());
        assert!(ProviderConfig::new("hashicorp/random/extra", "3.7.2", Untyped::Null).is_err());
        assert!(ProviderConfig::new("hashicorp/random", "", Untyped::Null).is_err());
        let ok = ProviderConfig::new("hashicorp/random", "3.7.2", Untyped::Null).unwrap();
        assert_eq!(ok.full_name(), "hashicorp/random@3.7.2");
        assert_eq!(ok.namespace(), "hashicorp");
        assert_eq!(ok.type_name(), "random");
    }
}
