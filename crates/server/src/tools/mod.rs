//! The JSON request/response shape and the dispatch table over the
//! [`Orchestrator`] for every tool in the external interface table.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use infractl_core::model::{DependencyEdge, DependencyType, FieldMapping, ProviderConfig};
use infractl_core::Error;

use crate::orchestrator::Orchestrator;

/// One `{type: "text", text: ...}` block of a tool response.
#[derive(Debug, Clone, Serialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
}

impl ContentBlock {
    fn text(text: impl Into<String>) -> Self {
        Self { kind: "text", text: text.into() }
    }
}

/// `{content: [...]}` on success, `{isError: true, content: [...]}` on
/// failure — the shape every tool call returns.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    #[serde(rename = "isError", skip_serializing_if = "is_false")]
    is_error: bool,
    content: Vec<ContentBlock>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !*b
}

impl ToolResponse {
    fn ok(value: &impl Serialize) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"serialization_error\": {e:?}}}"));
        Self { is_error: false, content: vec![ContentBlock::text(text)] }
    }

    fn ok_text(text: impl Into<String>) -> Self {
        Self { is_error: false, content: vec![ContentBlock::text(text)] }
    }

    fn err(error: &Error) -> Self {
        Self { is_error: true, content: vec![ContentBlock::text(error.to_string())] }
    }

    /// An error response carrying an arbitrary message, for failures that
    /// occur before a tool name is even dispatched (malformed request
    /// framing, cancellation).
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self { is_error: true, content: vec![ContentBlock::text(message.into())] }
    }

    /// An error response for a request cancelled via the shutdown token.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::error("cancelled: server is shutting down")
    }
}

/// A single row of the tool table, advertised in the `list-tools`
/// bootstrap message.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub required_params: &'static [&'static str],
}

/// The full tool table, in the order the external interface documents it.
#[must_use]
pub fn list_tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor { name: "provider-search", required_params: &["query"] },
        ToolDescriptor { name: "provider-describe", required_params: &["provider", "provider_version"] },
        ToolDescriptor { name: "provider-resources-describe", required_params: &["provider", "provider_version", "resource_type"] },
        ToolDescriptor { name: "provider-datasources-describe", required_params: &["provider", "provider_version", "data_source_type"] },
        ToolDescriptor {
            name: "lifecycle-resources-create",
            required_params: &["resource_id", "provider", "provider_version", "resource_type", "config"],
        },
        ToolDescriptor { name: "lifecycle-resources-update", required_params: &["resource_id", "config"] },
        ToolDescriptor { name: "lifecycle-resources-delete", required_params: &["resource_id"] },
        ToolDescriptor { name: "lifecycle-resources-refresh", required_params: &["resource_id"] },
        ToolDescriptor {
            name: "lifecycle-resources-import",
            required_params: &["destination_id", "provider", "provider_version", "resource_type", "import_id"],
        },
        ToolDescriptor { name: "lifecycle-resources-operations", required_params: &["resource_id"] },
        ToolDescriptor {
            name: "lifecycle-datasources-read",
            required_params: &["provider", "provider_version", "data_source_type", "config"],
        },
        ToolDescriptor { name: "state-get", required_params: &["resource_id"] },
        ToolDescriptor { name: "state-list", required_params: &[] },
        ToolDescriptor { name: "state-timeline", required_params: &[] },
        ToolDescriptor { name: "state-eject", required_params: &["resource_id"] },
        ToolDescriptor {
            name: "lifecycle-resources-dependencies-add",
            required_params: &["from_resource_id", "to_resource_id", "dependency_type", "explanation"],
        },
        ToolDescriptor { name: "lifecycle-resources-dependencies-get", required_params: &["resource_id"] },
        ToolDescriptor {
            name: "lifecycle-resources-dependencies-remove",
            required_params: &["from_resource_id", "to_resource_id"],
        },
    ]
}

fn required_str<'a>(args: &'a Json, field: &str) -> Result<&'a str, Error> {
    args.get(field)
        .and_then(Json::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::invalid_argument(format!("missing required parameter {field:?}")))
}

fn optional_str<'a>(args: &'a Json, field: &str) -> Option<&'a str> {
    args.get(field).and_then(Json::as_str)
}

/// Rejects a negative `limit`/`offset` before it reaches the store, where
/// SQLite would otherwise read a negative `LIMIT` as "no limit" instead of
/// erroring.
fn validate_paging(limit: Option<i64>, offset: Option<i64>) -> Result<(), Error> {
    if let Some(limit) = limit {
        if limit < 0 {
            return Err(Error::invalid_argument(format!("limit must not be negative, got {limit}")));
        }
    }
    if let Some(offset) = offset {
        if offset < 0 {
            return Err(Error::invalid_argument(format!("offset must not be negative, got {offset}")));
        }
    }
    Ok(())
}

fn config_of(args: &Json) -> Json {
    args.get("config").cloned().unwrap_or(Json::Null)
}

#[derive(Debug, Deserialize)]
struct DependencyEdgeArgs {
    from_resource_id: String,
    to_resource_id: String,
    dependency_type: DependencyType,
    explanation: String,
    #[serde(default)]
    field_mappings: Vec<FieldMapping>,
}

/// Dispatches one tool call by name, returning the response the stdio loop
/// writes back verbatim.
pub async fn dispatch(orchestrator: &Orchestrator, name: &str, args: &Json, actor: &str) -> ToolResponse {
    match run(orchestrator, name, args, actor).await {
        Ok(response) => response,
        Err(e) => ToolResponse::err(&e),
    }
}

async fn run(orchestrator: &Orchestrator, name: &str, args: &Json, actor: &str) -> infractl_core::Result<ToolResponse> {
    match name {
        "provider-search" => {
            let query = required_str(args, "query")?;
            let results = orchestrator.adapter().registry().search_providers(query).await;
            Ok(ToolResponse::ok(&results))
        }
        "provider-describe" => {
            let provider_config = provider_config_of(args)?;
            let schema = orchestrator.adapter().describe(&provider_config).await?;
            Ok(ToolResponse::ok(&schema))
        }
        "provider-resources-describe" => {
            let provider_config = provider_config_of(args)?;
            let resource_type = required_str(args, "resource_type")?;
            let schema = orchestrator.adapter().describe(&provider_config).await?;
            let description = schema
                .resources
                .get(resource_type)
                .ok_or_else(|| Error::not_found(format!("no resource type {resource_type:?} in provider schema")))?;
            Ok(ToolResponse::ok(description))
        }
        "provider-datasources-describe" => {
            let provider_config = provider_config_of(args)?;
            let data_source_type = required_str(args, "data_source_type")?;
            let schema = orchestrator.adapter().describe(&provider_config).await?;
            let description = schema
                .data_sources
                .get(data_source_type)
                .ok_or_else(|| Error::not_found(format!("no data source type {data_source_type:?} in provider schema")))?;
            Ok(ToolResponse::ok(description))
        }
        "lifecycle-resources-create" => {
            let resource_id = required_str(args, "resource_id")?;
            let provider = required_str(args, "provider")?;
            let provider_version = required_str(args, "provider_version")?;
            let resource_type = required_str(args, "resource_type")?;
            let config = config_of(args);
            let record = orchestrator.create(resource_id, provider, provider_version, resource_type, &config, actor).await?;
            Ok(ToolResponse::ok(&record))
        }
        "lifecycle-resources-update" => {
            let resource_id = required_str(args, "resource_id")?;
            let config = config_of(args);
            let record = orchestrator.update(resource_id, &config, actor).await?;
            Ok(ToolResponse::ok(&record))
        }
        "lifecycle-resources-delete" => {
            let resource_id = required_str(args, "resource_id")?;
            orchestrator.delete(resource_id, actor).await?;
            Ok(ToolResponse::ok_text("deleted"))
        }
        "lifecycle-resources-refresh" => {
            let resource_id = required_str(args, "resource_id")?;
            let record = orchestrator.refresh(resource_id, actor).await?;
            Ok(ToolResponse::ok(&record))
        }
        "lifecycle-resources-import" => {
            let destination_id = optional_str(args, "destination_id").or_else(|| optional_str(args, "resource_id"));
            let destination_id =
                destination_id.filter(|s| !s.is_empty()).ok_or_else(|| Error::invalid_argument("missing required parameter \"destination_id\""))?;
            let provider = required_str(args, "provider")?;
            let provider_version = required_str(args, "provider_version")?;
            let resource_type = required_str(args, "resource_type")?;
            let import_id = required_str(args, "import_id")?;
            let record = orchestrator.import(destination_id, provider, provider_version, resource_type, import_id, actor).await?;
            Ok(ToolResponse::ok(&record))
        }
        "lifecycle-resources-operations" => {
            let resource_id = required_str(args, "resource_id")?;
            let mut query: infractl_state::ListOperationsArgs = serde_json::from_value(args.clone())
                .map_err(|e| Error::invalid_argument(format!("invalid operations query: {e}")))?;
            validate_paging(query.limit, query.offset)?;
            query.resource_id = Some(resource_id.to_string());
            let ops = orchestrator.store().list_resource_operations(&query).await?;
            Ok(ToolResponse::ok(&ops))
        }
        "lifecycle-datasources-read" => {
            let provider = required_str(args, "provider")?;
            let provider_version = required_str(args, "provider_version")?;
            let data_source_type = required_str(args, "data_source_type")?;
            let config = config_of(args);
            let result = orchestrator.read_data_source(provider, provider_version, data_source_type, &config).await?;
            Ok(ToolResponse::ok(&result))
        }
        "state-get" => {
            let resource_id = required_str(args, "resource_id")?;
            let record = orchestrator
                .store()
                .get_state(resource_id)
                .await?
                .ok_or_else(|| Error::not_found(format!("no state recorded for resource id {resource_id:?}")))?;
            Ok(ToolResponse::ok(&record))
        }
        "state-list" => {
            let records = orchestrator.store().list_states().await?;
            Ok(ToolResponse::ok(&records))
        }
        "state-timeline" => {
            let query: infractl_state::TimelineQuery = serde_json::from_value(args.clone())
                .map_err(|e| Error::invalid_argument(format!("invalid timeline query: {e}")))?;
            validate_paging(query.limit, query.offset)?;
            let response = orchestrator.store().get_timeline(&query).await?;
            Ok(ToolResponse::ok(&response))
        }
        "state-eject" => {
            let resource_id = required_str(args, "resource_id")?;
            orchestrator.eject(resource_id, actor).await?;
            Ok(ToolResponse::ok_text("ejected"))
        }
        "lifecycle-resources-dependencies-add" => {
            let edge_args: DependencyEdgeArgs = serde_json::from_value(args.clone())
                .map_err(|e| Error::invalid_argument(format!("invalid dependency edge: {e}")))?;
            let edge = DependencyEdge {
                from_resource_id: edge_args.from_resource_id,
                to_resource_id: edge_args.to_resource_id,
                dependency_type: edge_args.dependency_type,
                explanation: edge_args.explanation,
                field_mappings: edge_args.field_mappings,
                created_at: chrono::Utc::now(),
            };
            orchestrator.store().add_dependency(&edge).await?;
            Ok(ToolResponse::ok(&edge))
        }
        "lifecycle-resources-dependencies-get" => {
            let resource_id = required_str(args, "resource_id")?;
            let edges = match optional_str(args, "direction") {
                Some("to") => orchestrator.store().get_dependents(resource_id).await?,
                _ => orchestrator.store().get_dependencies(resource_id).await?,
            };
            Ok(ToolResponse::ok(&edges))
        }
        "lifecycle-resources-dependencies-remove" => {
            let from_resource_id = required_str(args, "from_resource_id")?;
            let to_resource_id = required_str(args, "to_resource_id")?;
            orchestrator.store().remove_dependency(from_resource_id, to_resource_id).await?;
            Ok(ToolResponse::ok_text("removed"))
        }
        other => Err(Error::invalid_argument(format!("unknown tool {other:?}"))),
    }
}

fn provider_config_of(args: &Json) -> infractl_core::Result<ProviderConfig> {
    let provider = required_str(args, "provider")?;
    let provider_version = required_str(args, "provider_version")?;
    ProviderConfig::new(provider, provider_version, Json::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_limit_is_rejected() {
        assert!(validate_paging(Some(-1), None).is_err());
    }

    #[test]
    fn negative_offset_is_rejected() {
        assert!(validate_paging(None, Some(-1)).is_err());
    }

    #[test]
    fn non_negative_paging_is_accepted() {
        assert!(validate_paging(Some(0), Some(0)).is_ok());
        assert!(validate_paging(None, None).is_ok());
    }
}
