//! The seven tool-facing lifecycle operations, each resolving the owning
//! provider, calling the Provider Adapter, persisting the result, and
//! recording a [`ResourceOperation`] (and, through the ambient context, a
//! timeline event) for every write.

use chrono::Utc;
use uuid::Uuid;

use infractl_core::model::{Operation, ProviderConfig, ResourceOperation, StateRecord};
use infractl_core::value::Untyped;
use infractl_core::{Error, Result};
use infractl_provider::ProviderAdapter;
use infractl_state::{context, StateStore};

/// Ties the Provider Adapter and State Store together into the seven
/// lifecycle operations the tool surface calls.
pub struct Orchestrator {
    adapter: ProviderAdapter,
    store: StateStore,
}

impl Orchestrator {
    /// Creates an orchestrator over an already-constructed adapter and
    /// store.
    #[must_use]
    pub fn new(adapter: ProviderAdapter, store: StateStore) -> Self {
        Self { adapter, store }
    }

    /// The underlying state store, for tools that read it directly
    /// (`state-get`, `state-list`, `state-timeline`, dependency tools).
    #[must_use]
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// The underlying provider adapter, for tools that only need schema
    /// information (`provider-describe` and friends).
    #[must_use]
    pub fn adapter(&self) -> &ProviderAdapter {
        &self.adapter
    }

    /// `Create(resource_id, provider, provider_version, resource_type, config)`.
    pub async fn create(
        &self,
        resource_id: &str,
        provider: &str,
        provider_version: &str,
        resource_type: &str,
        config: &Untyped,
        actor: &str,
    ) -> Result<StateRecord> {
        let provider_config = ProviderConfig::new(provider, provider_version, Untyped::Null)?;
        let outcome = self.adapter.create(&provider_config, resource_type, config).await;
        self.finish(
            resource_id,
            provider,
            provider_version,
            resource_type,
            Operation::Create,
            None,
            Some(config.clone()),
            outcome,
            actor,
        )
        .await
    }

    /// `Update(resource_id, config)`: shallow-merges `config` over the
    /// stored state at the top level before calling the adapter.
    pub async fn update(&self, resource_id: &str, config: &Untyped, actor: &str) -> Result<StateRecord> {
        let existing = self.require_state(resource_id).await?;
        let provider_config = provider_config_from_record(&existing)?;
        let merged = shallow_merge(&existing.state, config);

        let outcome = self.adapter.update(&provider_config, &existing.resource_type, &existing.state, &merged).await;
        self.finish(
            resource_id,
            &existing.provider,
            &existing.provider_version,
            &existing.resource_type,
            Operation::Update,
            Some(existing.state.clone()),
            Some(merged),
            outcome,
            actor,
        )
        .await
    }

    /// `Delete(resource_id)`.
    pub async fn delete(&self, resource_id: &str, actor: &str) -> Result<()> {
        let existing = self.require_state(resource_id).await?;
        let provider_config = provider_config_from_record(&existing)?;

        let outcome = self.adapter.delete(&provider_config, &existing.resource_type, &existing.state).await;
        let failed = outcome.as_ref().err().map(ToString::to_string);

        if failed.is_none() {
            context::with_operation(Operation::Delete, actor, self.store.delete_state(resource_id)).await?;
        }

        self.record_operation(
            resource_id,
            &existing.provider,
            &existing.provider_version,
            &existing.resource_type,
            Operation::Delete,
            Some(existing.state.clone()),
            None,
            failed.clone(),
        )
        .await?;

        match (outcome, failed) {
            (Ok(()), _) => Ok(()),
            (Err(e), _) => Err(e),
        }
    }

    /// `Refresh(resource_id)`.
    pub async fn refresh(&self, resource_id: &str, actor: &str) -> Result<StateRecord> {
        let existing = self.require_state(resource_id).await?;
        let provider_config = provider_config_from_record(&existing)?;

        let outcome = self.adapter.refresh(&provider_config, &existing.resource_type, &existing.state).await;
        self.finish(
            resource_id,
            &existing.provider,
            &existing.provider_version,
            &existing.resource_type,
            Operation::Refresh,
            Some(existing.state.clone()),
            None,
            outcome,
            actor,
        )
        .await
    }

    /// `Import(destination_id, provider, provider_version, resource_type, import_id)`.
    pub async fn import(
        &self,
        destination_id: &str,
        provider: &str,
        provider_version: &str,
        resource_type: &str,
        import_id: &str,
        actor: &str,
    ) -> Result<StateRecord> {
        let provider_config = ProviderConfig::new(provider, provider_version, Untyped::Null)?;
        let outcome = self.adapter.import(&provider_config, resource_type, import_id).await;
        self.finish(
            destination_id,
            provider,
            provider_version,
            resource_type,
            Operation::Import,
            None,
            None,
            outcome,
            actor,
        )
        .await
    }

    /// `Eject(resource_id)`: removes state without invoking the provider.
    pub async fn eject(&self, resource_id: &str, actor: &str) -> Result<()> {
        let existing = self.require_state(resource_id).await?;
        context::with_operation(Operation::Eject, actor, self.store.delete_state(resource_id)).await?;
        self.record_operation(
            resource_id,
            &existing.provider,
            &existing.provider_version,
            &existing.resource_type,
            Operation::Eject,
            Some(existing.state.clone()),
            None,
            None,
        )
        .await
    }

    /// `ReadDataSource(provider, data_source_type, config)`: direct
    /// pass-through, no persistence.
    pub async fn read_data_source(&self, provider: &str, provider_version: &str, data_source_type: &str, config: &Untyped) -> Result<Untyped> {
        let provider_config = ProviderConfig::new(provider, provider_version, Untyped::Null)?;
        self.adapter.read_data_source(&provider_config, data_source_type, config).await
    }

    async fn require_state(&self, resource_id: &str) -> Result<StateRecord> {
        self.store
            .get_state(resource_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("no state recorded for resource id {resource_id:?}")))
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        resource_id: &str,
        provider: &str,
        provider_version: &str,
        resource_type: &str,
        operation: Operation,
        current_state: Option<Untyped>,
        proposed_state: Option<Untyped>,
        outcome: Result<Untyped>,
        actor: &str,
    ) -> Result<StateRecord> {
        match outcome {
            Ok(new_state) => {
                let record = StateRecord {
                    resource_id: resource_id.to_string(),
                    provider: provider.to_string(),
                    provider_version: provider_version.to_string(),
                    resource_type: resource_type.to_string(),
                    state: new_state,
                    created_at: Utc::now(),
                };
                context::with_operation(operation, actor, self.store.save_state(&record)).await?;
                self.record_operation(resource_id, provider, provider_version, resource_type, operation, current_state, proposed_state, None)
                    .await?;
                Ok(record)
            }
            Err(e) => {
                self.record_operation(
                    resource_id,
                    provider,
                    provider_version,
                    resource_type,
                    operation,
                    current_state,
                    proposed_state,
                    Some(e.to_string()),
                )
                .await?;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_operation(
        &self,
        resource_id: &str,
        provider: &str,
        provider_version: &str,
        resource_type: &str,
        operation: Operation,
        current_state: Option<Untyped>,
        proposed_state: Option<Untyped>,
        failed: Option<String>,
    ) -> Result<()> {
        let op = ResourceOperation {
            id: Uuid::now_v7().to_string(),
            resource_id: resource_id.to_string(),
            resource_type: resource_type.to_string(),
            provider: provider.to_string(),
            provider_version: provider_version.to_string(),
            operation,
            current_state,
            proposed_state,
            created_at: Utc::now(),
            failed,
        };
        self.store.save_resource_operation(&op).await
    }
}

fn provider_config_from_record(rec: &StateRecord) -> Result<ProviderConfig> {
    ProviderConfig::new(rec.provider.clone(), rec.provider_version.clone(), Untyped::Null)
}

/// Shallow-merges `overlay` over `base` at the top level only: missing
/// top-level keys in `overlay` preserve `base`'s value; present keys replace
/// `base`'s value wholesale, including nested structure. Non-object inputs
/// fall back to replacing `base` entirely with `overlay`.
fn shallow_merge(base: &Untyped, overlay: &Untyped) -> Untyped {
    match (base, overlay) {
        (Untyped::Object(base_map), Untyped::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (k, v) in overlay_map {
                merged.insert(k.clone(), v.clone());
            }
            Untyped::Object(merged)
        }
        _ => overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shallow_merge_preserves_missing_keys_and_replaces_present_ones_wholesale() {
        let base = serde_json::json!({"name": "a", "tags": {"env": "prod", "team": "x"}});
        let overlay = serde_json::json!({"tags": {"env": "staging"}});
        let merged = shallow_merge(&base, &overlay);
        assert_eq!(merged["name"], serde_json::json!("a"));
        assert_eq!(merged["tags"], serde_json::json!({"env": "staging"}));
    }

    #[test]
    fn shallow_merge_of_non_objects_replaces_wholesale() {
        let base = serde_json::json!(["a", "b"]);
        let overlay = serde_json::json!(["c"]);
        assert_eq!(shallow_merge(&base, &overlay), overlay);
    }
}
