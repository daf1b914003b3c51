//! Derives a typed object [`Type`] and a human-readable [`TypeDescription`]
//! from a provider's resource or data source schema.
//!
//! The input types here ([`RawBlock`], [`RawAttribute`], [`RawNestedBlock`])
//! are the provider crate's decoded view of the schema returned by
//! `GetProviderSchema`; this module is deliberately wire-format agnostic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::model::{PropertyDescription, TypeDescription, Usage};
use crate::value::Type;

/// How a nested block or nested attribute type repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NestingMode {
    /// Exactly one occurrence, represented as an object.
    Single,
    /// Like `Single`, grouping related attributes without repetition.
    Group,
    /// Zero or more occurrences, order-preserving.
    List,
    /// Zero or more occurrences, unordered.
    Set,
    /// Zero or more occurrences, keyed by a caller-chosen label.
    Map,
}

impl NestingMode {
    fn container_label(self) -> &'static str {
        match self {
            Self::Single | Self::Group => "object",
            Self::List => "list",
            Self::Set => "set",
            Self::Map => "map",
        }
    }

    fn wrap(self, elem: Type) -> Type {
        match self {
            Self::Single | Self::Group => elem,
            Self::List => Type::List(Box::new(elem)),
            Self::Set => Type::Set(Box::new(elem)),
            Self::Map => Type::Map(Box::new(elem)),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Group => "group",
            Self::List => "list",
            Self::Set => "set",
            Self::Map => "map",
        }
    }
}

/// A nested object type on an attribute (as opposed to a nested block).
#[derive(Debug, Clone)]
pub struct RawNestedType {
    /// Attributes of the nested object.
    pub attributes: Vec<RawAttribute>,
    /// How the nested object repeats.
    pub nesting: NestingMode,
}

/// One declared attribute of a [`RawBlock`].
#[derive(Debug, Clone)]
pub struct RawAttribute {
    /// Attribute name.
    pub name: String,
    /// Declared type, decoded from the provider's ctyjson type encoding.
    pub attr_type: Type,
    /// Human-readable description, if supplied.
    pub description: Option<String>,
    /// Must be supplied by the caller.
    pub required: bool,
    /// May be supplied by the caller.
    pub optional: bool,
    /// Always/sometimes computed by the provider.
    pub computed: bool,
    /// Sensitive values are redacted from logs and descriptions.
    pub sensitive: bool,
    /// Deprecated attributes remain usable but are flagged.
    pub deprecated: bool,
    /// Write-only attributes are never present in persisted state.
    pub write_only: bool,
    /// Present when this attribute is a nested object rather than a scalar
    /// or plain collection.
    pub nested_type: Option<RawNestedType>,
}

/// A declared nested block of a [`RawBlock`].
#[derive(Debug, Clone)]
pub struct RawNestedBlock {
    /// Block type name.
    pub type_name: String,
    /// The nested block's own shape.
    pub block: RawBlock,
    /// How the block repeats.
    pub nesting: NestingMode,
    /// Minimum occurrence count, if constrained.
    pub min_items: Option<i64>,
    /// Maximum occurrence count, if constrained.
    pub max_items: Option<i64>,
}

/// The shape of a resource, data source, or provider configuration block.
#[derive(Debug, Clone, Default)]
pub struct RawBlock {
    /// Declared attributes.
    pub attributes: Vec<RawAttribute>,
    /// Declared nested blocks.
    pub block_types: Vec<RawNestedBlock>,
}

/// `DeriveObjectType(schema) -> Type`.
///
/// An empty block yields [`Type::Dynamic`]; otherwise an [`Type::Object`]
/// with one entry per attribute and nested block. Nesting-to-container
/// mapping is exactly: `Single`/`Group` → object, `List` → `list(object)`,
/// `Set` → `set(object)`, `Map` → `map(object)`.
#[must_use]
pub fn derive_object_type(block: &RawBlock) -> Type {
    if block.attributes.is_empty() && block.block_types.is_empty() {
        return Type::Dynamic;
    }

    let mut attrs = BTreeMap::new();

    for attr in &block.attributes {
        let t = match &attr.nested_type {
            Some(nested) => derive_nested_attribute_type(nested),
            None => attr.attr_type.clone(),
        };
        attrs.insert(attr.name.clone(), t);
    }

    for nested_block in &block.block_types {
        let inner = derive_object_type(&nested_block.block);
        attrs.insert(nested_block.type_name.clone(), nested_block.nesting.wrap(inner));
    }

    Type::Object(attrs)
}

fn derive_nested_attribute_type(nested: &RawNestedType) -> Type {
    let mut attrs = BTreeMap::new();
    for attr in &nested.attributes {
        let t = match &attr.nested_type {
            Some(inner) => derive_nested_attribute_type(inner),
            None => attr.attr_type.clone(),
        };
        attrs.insert(attr.name.clone(), t);
    }
    nested.nesting.wrap(Type::Object(attrs))
}

/// The kind of schema being described, used only to choose a sensible
/// default `type_name`/`description` when the caller does not supply one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    /// A managed resource type.
    Resource,
    /// A read-only data source type.
    DataSource,
    /// A provider's own configuration block.
    Provider,
}

/// `DescribeSchema(providerName, typeName, schema, kind) -> TypeDescription`.
#[must_use]
pub fn describe_schema(
    provider_name: &str,
    type_name: &str,
    block: &RawBlock,
    _kind: SchemaKind,
) -> TypeDescription {
    let mut properties = BTreeMap::new();
    let mut required = Vec::new();

    for attr in &block.attributes {
        if attr.required {
            required.push(attr.name.clone());
        }
        properties.insert(attr.name.clone(), describe_attribute(attr));
    }

    for nested_block in &block.block_types {
        properties.insert(nested_block.type_name.clone(), describe_nested_block(nested_block));
    }

    TypeDescription {
        provider_name: provider_name.to_string(),
        type_name: type_name.to_string(),
        description: None,
        properties,
        required,
    }
}

fn usage_of(attr: &RawAttribute) -> Usage {
    match (attr.required, attr.optional, attr.computed) {
        (true, _, _) => Usage::Required,
        (false, true, false) => Usage::Optional,
        (false, true, true) => Usage::OptionalComputed,
        (false, false, true) => Usage::Computed,
        _ => Usage::Unsupported,
    }
}

fn type_tag_of(t: &Type) -> &'static str {
    match t {
        Type::Dynamic => "unknown",
        Type::String => "string",
        Type::Number => "number",
        Type::Bool => "boolean",
        Type::Object(_) => "object",
        Type::Map(_) => "map",
        Type::List(_) => "list",
        Type::Set(_) => "set",
        Type::Tuple(_) => "list",
    }
}

fn describe_attribute(attr: &RawAttribute) -> PropertyDescription {
    let (type_tag, nested, properties, required_properties) = match &attr.nested_type {
        Some(nested_type) => {
            let mut props = BTreeMap::new();
            let mut req = Vec::new();
            for inner in &nested_type.attributes {
                if inner.required {
                    req.push(inner.name.clone());
                }
                props.insert(inner.name.clone(), describe_attribute(inner));
            }
            (nested_type.nesting.container_label(), true, props, req)
        }
        None => (type_tag_of(&attr.attr_type), false, BTreeMap::new(), Vec::new()),
    };

    PropertyDescription {
        type_tag: type_tag.to_string(),
        required: attr.required,
        usage: usage_of(attr),
        sensitive: attr.sensitive,
        deprecated: attr.deprecated,
        write_only: attr.write_only,
        description: attr.description.clone(),
        nested,
        is_block: false,
        nesting: None,
        min_items: None,
        max_items: None,
        properties,
        required_properties,
        nested_blocks: BTreeMap::new(),
    }
}

fn describe_nested_block(block: &RawNestedBlock) -> PropertyDescription {
    let mut properties = BTreeMap::new();
    let mut required_properties = Vec::new();
    let mut nested_blocks = BTreeMap::new();

    for attr in &block.block.attributes {
        if attr.required {
            required_properties.push(attr.name.clone());
        }
        properties.insert(attr.name.clone(), describe_attribute(attr));
    }
    for inner in &block.block.block_types {
        nested_blocks.insert(inner.type_name.clone(), describe_nested_block(inner));
    }

    PropertyDescription {
        type_tag: block.nesting.container_label().to_string(),
        required: false,
        usage: Usage::Optional,
        sensitive: false,
        deprecated: false,
        write_only: false,
        description: None,
        nested: false,
        is_block: true,
        nesting: Some(block.nesting.label().to_string()),
        min_items: block.min_items,
        max_items: block.max_items,
        properties,
        required_properties,
        nested_blocks,
    }
}

/// Decodes a provider's ctyjson-encoded attribute type into a [`Type`].
///
/// The encoding (from go-cty's `ctyjson` package) represents primitives as a
/// bare string (`"string"`, `"number"`, `"bool"`, `"dynamic"`) and
/// collections/objects as a two-element array: `["list", ELEM]`,
/// `["set", ELEM]`, `["map", ELEM]`, `["object", {attr: TYPE, ...}]`,
/// `["tuple", [T1, T2, ...]]`. Unrecognized shapes degrade gracefully to
/// [`Type::Dynamic`] rather than failing the whole schema fetch.
#[must_use]
pub fn parse_cty_type(v: &Json) -> Type {
    match v {
        Json::String(s) => match s.as_str() {
            "string" => Type::String,
            "number" => Type::Number,
            "bool" => Type::Bool,
            _ => Type::Dynamic,
        },
        Json::Array(items) if items.len() == 2 => match items[0].as_str() {
            Some("list") => Type::List(Box::new(parse_cty_type(&items[1]))),
            Some("set") => Type::Set(Box::new(parse_cty_type(&items[1]))),
            Some("map") => Type::Map(Box::new(parse_cty_type(&items[1]))),
            Some("object") => {
                let attrs = items[1]
                    .as_object()
                    .map(|m| {
                        m.iter()
                            .map(|(k, v)| (k.clone(), parse_cty_type(v)))
                            .collect()
                    })
                    .unwrap_or_default();
                Type::Object(attrs)
            }
            Some("tuple") => {
                let types = items[1]
                    .as_array()
                    .map(|a| a.iter().map(parse_cty_type).collect())
                    .unwrap_or_default();
                Type::Tuple(types)
            }
            _ => Type::Dynamic,
        },
        _ => Type::Dynamic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_attr(name: &str, t: Type, required: bool) -> RawAttribute {
        RawAttribute {
            name: name.to_string(),
            attr_type: t,
            description: None,
            required,
            optional: !required,
            computed: false,
            sensitive: false,
            deprecated: false,
            write_only: false,
            nested_type: None,
        }
    }

    #[test]
    fn derives_object_with_one_entry_per_attribute_and_block() {
        let block = RawBlock {
            attributes: vec![
                scalar_attr("id", Type::String, false),
                scalar_attr("length", Type::Number, true),
            ],
            block_types: vec![RawNestedBlock {
                type_name: "keepers".to_string(),
                block: RawBlock {
                    attributes: vec![scalar_attr("key", Type::String, false)],
                    block_types: vec![],
                },
                nesting: NestingMode::Map,
                min_items: None,
                max_items: None,
            }],
        };

        let t = derive_object_type(&block);
        match t {
            Type::Object(attrs) => {
                assert_eq!(attrs.len(), 3);
                assert_eq!(attrs["id"], Type::String);
                assert!(matches!(attrs["keepers"], Type::Map(_)));
            }
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn empty_schema_yields_dynamic() {
        assert_eq!(derive_object_type(&RawBlock::default()), Type::Dynamic);
    }

    #[test]
    fn nesting_to_container_mapping() {
        let base = RawBlock { attributes: vec![scalar_attr("x", Type::String, false)], block_types: vec![] };
        for (mode, expect_object) in [
            (NestingMode::Single, true),
            (NestingMode::Group, true),
        ] {
            let nested_block = RawNestedBlock {
                type_name: "n".to_string(),
                block: base.clone(),
                nesting: mode,
                min_items: None,
                max_items: None,
            };
            let wrapped = RawBlock { attributes: vec![], block_types: vec![nested_block] };
            let t = derive_object_type(&wrapped);
            if let Type::Object(attrs) = t {
                assert_eq!(matches!(attrs["n"], Type::Object(_)), expect_object);
            }
        }
    }

    #[test]
    fn describe_schema_flags_required_usage_and_sensitivity() {
        let mut attr = scalar_attr("password", Type::String, true);
        attr.sensitive = true;
        let block = RawBlock { attributes: vec![attr], block_types: vec![] };
        let desc = describe_schema("hashicorp/x", "x_y", &block, SchemaKind::Resource);
        assert_eq!(desc.required, vec!["password".to_string()]);
        let prop = &desc.properties["password"];
        assert!(prop.sensitive);
        assert_eq!(prop.usage, Usage::Required);
    }

    #[test]
    fn parses_cty_json_type_encoding() {
        assert_eq!(parse_cty_type(&serde_json::json!("string")), Type::String);
        assert_eq!(
            parse_cty_type(&serde_json::json!(["list", "number"])),
            Type::List(Box::new(Type::Number))
        );
        let obj = parse_cty_type(&serde_json::json!(["object", {"a": "string"}]));
        assert!(matches!(obj, Type::Object(_)));
    }
}
