//! The orchestration layer that turns a loaded provider plugin's raw RPCs
//! into the seven lifecycle operations the rest of the system calls —
//! `Plan`, `Create`, `Update`, `Delete`, `Refresh`, `Import`,
//! `ReadDataSource` — plus the load/configure/cleanup lifecycle around
//! them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use infractl_core::model::{ProviderConfig, ProviderSchema};
use infractl_core::value::{Type, Untyped, Value};
use infractl_core::{Error, Result};

use crate::cache::BinaryCache;
use crate::codec::{decode_wire, encode_wire};
use crate::host::PluginClient;
use crate::proto::{self, Diagnostic, Severity};
use crate::schema::{self, RawAttribute, RawBlock, RawNestedBlock, RawNestedType, SchemaKind};

/// A loaded, configured provider: its live plugin client plus the derived
/// types needed to encode/decode every resource and data source it exposes.
pub struct Entry {
    /// The running plugin subprocess and its gRPC handle.
    pub client: Arc<PluginClient>,
    /// Human-readable schema description, as returned by the describe tools.
    pub schema: ProviderSchema,
    /// Resource type name → derived [`Type`], used to decode/encode state.
    pub resource_types: HashMap<String, Type>,
    /// Data source type name → derived [`Type`].
    pub data_source_types: HashMap<String, Type>,
}

/// Caches loaded, configured providers by `FullName` (`namespace/type@version`)
/// and exposes the seven lifecycle operations against them.
///
/// Single-writer-per-`FullName` semantics: concurrent `ensure_loaded` calls
/// for the same key serialize on a per-key latch rather than blocking callers
/// for unrelated providers.
pub struct ProviderAdapter {
    cache: BinaryCache,
    providers: DashMap<String, Arc<Entry>>,
    init_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ProviderAdapter {
    /// Creates an adapter that resolves provider binaries through `cache`.
    #[must_use]
    pub fn new(cache: BinaryCache) -> Self {
        Self { cache, providers: DashMap::new(), init_locks: DashMap::new() }
    }

    /// The registry client backing this adapter's binary cache, for tools
    /// that only need registry lookups (`provider-search`).
    #[must_use]
    pub fn registry(&self) -> &crate::registry::RegistryClient {
        self.cache.registry()
    }

    fn init_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.init_locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// `EnsureLoaded(providerConfig) -> Entry`: resolves the binary, starts
    /// the subprocess, fetches and derives its schema, and configures it,
    /// caching the result for subsequent calls under the same `FullName`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderLoadFailed`] if the binary cannot be
    /// resolved, the subprocess cannot be started, or no candidate
    /// configuration is accepted. Returns [`Error::ProviderDiagnosticError`]
    /// if `GetProviderSchema` itself reports an error diagnostic.
    #[instrument(skip(self, config), fields(full_name = %config.full_name()))]
    pub async fn ensure_loaded(&self, config: &ProviderConfig) -> Result<Arc<Entry>> {
        let key = config.full_name();

        if let Some(entry) = self.providers.get(&key) {
            return Ok(entry.clone());
        }

        let lock = self.init_lock(&key);
        let _guard = lock.lock().await;

        if let Some(entry) = self.providers.get(&key) {
            return Ok(entry.clone());
        }

        let binary_path = self.cache.resolve(config).await?;
        let client = Arc::new(PluginClient::start(&key, &binary_path.to_string_lossy()).await?);

        let raw_schema = client.get_schema().await?;
        if let Some(err) = diagnostics_error("get_schema", &raw_schema.diagnostics) {
            return Err(err);
        }

        let provider_block = raw_schema.provider.as_ref().map(raw_block_from_proto).unwrap_or_default();
        let provider_type = schema::derive_object_type(&provider_block);

        let mut resource_types = HashMap::new();
        let mut resources = BTreeMap::new();
        for (name, s) in &raw_schema.resource_schemas {
            let block = raw_block_from_proto(s);
            resource_types.insert(name.clone(), schema::derive_object_type(&block));
            resources.insert(name.clone(), schema::describe_schema(&config.name, name, &block, SchemaKind::Resource));
        }

        let mut data_source_types = HashMap::new();
        let mut data_sources = BTreeMap::new();
        for (name, s) in &raw_schema.data_source_schemas {
            let block = raw_block_from_proto(s);
            data_source_types.insert(name.clone(), schema::derive_object_type(&block));
            data_sources.insert(name.clone(), schema::describe_schema(&config.name, name, &block, SchemaKind::DataSource));
        }

        Self::configure(&client, &key, &provider_type, &config.config).await?;

        let entry = Arc::new(Entry {
            client,
            schema: ProviderSchema {
                provider: schema::describe_schema(&config.name, &config.name, &provider_block, SchemaKind::Provider),
                resources,
                data_sources,
                version: config.version.clone(),
            },
            resource_types,
            data_source_types,
        });

        info!(full_name = %key, "provider loaded and configured");
        self.providers.insert(key, entry.clone());
        Ok(entry)
    }

    /// Tries a fallback ladder of candidate configurations: (a) the caller's
    /// own configuration, if supplied and the provider accepts it; (b) an
    /// empty configuration (`Null(Dynamic)`); (c) an object whose every
    /// attribute is `Null(Dynamic)` and whose nested-block attributes are
    /// empty maps. The first candidate whose `ConfigureProvider` call
    /// returns no error diagnostic is accepted.
    async fn configure(client: &PluginClient, full_name: &str, provider_type: &Type, supplied: &Untyped) -> Result<()> {
        let mut candidates = Vec::new();

        if !supplied.is_null() {
            if let Ok(v) = infractl_core::value::untyped_to_typed(supplied, provider_type) {
                candidates.push(v);
            }
        }
        candidates.push(Value::Null(Type::Dynamic));
        if let Type::Object(attrs) = provider_type {
            let mut obj = BTreeMap::new();
            for (name, t) in attrs {
                let placeholder = match t {
                    Type::Map(_) => Value::Map(Type::Dynamic, BTreeMap::new()),
                    Type::List(_) => Value::List(Type::Dynamic, Vec::new()),
                    Type::Set(_) => Value::Set(Type::Dynamic, Vec::new()),
                    _ => Value::Null(Type::Dynamic),
                };
                obj.insert(name.clone(), placeholder);
            }
            candidates.push(Value::Object(obj));
        }

        let mut last_error = None;
        for candidate in candidates {
            let wire = match encode_wire(&candidate) {
                Ok(w) => w,
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };
            match client.configure(wire).await {
                Ok(resp) => match diagnostics_error("configure", &resp.diagnostics) {
                    None => return Ok(()),
                    Some(e) => {
                        warn!(full_name, error = %e, "configure candidate rejected");
                        last_error = Some(e);
                    }
                },
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::ProviderLoadFailed {
            full_name: full_name.to_string(),
            message: "no configuration candidate was accepted".to_string(),
        }))
    }

    fn resource_type(entry: &Entry, type_name: &str) -> Result<Type> {
        entry
            .resource_types
            .get(type_name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("resource type {type_name:?} is not declared by this provider")))
    }

    fn data_source_type(entry: &Entry, type_name: &str) -> Result<Type> {
        entry
            .data_source_types
            .get(type_name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("data source type {type_name:?} is not declared by this provider")))
    }

    /// `Plan(currentState, newConfig) -> plannedState`. `current_state` is
    /// `None` for a not-yet-created resource.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderDiagnosticError`] if the provider reports an
    /// error diagnostic, or [`Error::TypeMismatch`] if an input does not
    /// match the resource's derived schema type.
    #[instrument(skip(self, current_state, new_config), fields(full_name = %config.full_name(), resource_type = type_name))]
    pub async fn plan(
        &self,
        config: &ProviderConfig,
        type_name: &str,
        current_state: Option<&Untyped>,
        new_config: &Untyped,
    ) -> Result<Untyped> {
        let entry = self.ensure_loaded(config).await?;
        let t = Self::resource_type(&entry, type_name)?;

        let prior = match current_state {
            None => Value::Null(t.clone()),
            Some(s) => infractl_core::value::untyped_to_typed(s, &t)?,
        };
        let cfg = infractl_core::value::untyped_to_typed(new_config, &t)?;

        let resp = entry
            .client
            .plan_resource_change(type_name, encode_wire(&prior)?, encode_wire(&cfg)?, encode_wire(&cfg)?, Vec::new())
            .await?;
        if let Some(e) = diagnostics_error("plan", &resp.diagnostics) {
            return Err(e);
        }
        let planned = resp.planned_state.unwrap_or_default();
        let decoded = decode_wire(&planned, &t)?;
        infractl_core::value::typed_to_untyped(&decoded)
    }

    /// `Create(config) -> newState`: plans against an absent prior state and
    /// applies the resulting plan.
    #[instrument(skip(self, config_data), fields(full_name = %provider.full_name(), resource_type = type_name))]
    pub async fn create(&self, provider: &ProviderConfig, type_name: &str, config_data: &Untyped) -> Result<Untyped> {
        let entry = self.ensure_loaded(provider).await?;
        let t = Self::resource_type(&entry, type_name)?;
        let prior = Value::Null(t.clone());
        let cfg = infractl_core::value::untyped_to_typed(config_data, &t)?;
        self.plan_and_apply(&entry, type_name, &t, prior, cfg).await
    }

    /// `Update(currentState, newConfig) -> newState`: plans against the
    /// existing state and applies the resulting plan. Callers are
    /// responsible for the top-level shallow merge before calling this.
    #[instrument(skip(self, current_state, new_config), fields(full_name = %provider.full_name(), resource_type = type_name))]
    pub async fn update(
        &self,
        provider: &ProviderConfig,
        type_name: &str,
        current_state: &Untyped,
        new_config: &Untyped,
    ) -> Result<Untyped> {
        let entry = self.ensure_loaded(provider).await?;
        let t = Self::resource_type(&entry, type_name)?;
        let prior = infractl_core::value::untyped_to_typed(current_state, &t)?;
        let cfg = infractl_core::value::untyped_to_typed(new_config, &t)?;
        self.plan_and_apply(&entry, type_name, &t, prior, cfg).await
    }

    async fn plan_and_apply(&self, entry: &Entry, type_name: &str, t: &Type, prior: Value, cfg: Value) -> Result<Untyped> {
        let prior_wire = encode_wire(&prior)?;
        let cfg_wire = encode_wire(&cfg)?;

        let plan_resp = entry
            .client
            .plan_resource_change(type_name, prior_wire.clone(), cfg_wire.clone(), cfg_wire.clone(), Vec::new())
            .await?;
        if let Some(e) = diagnostics_error("plan", &plan_resp.diagnostics) {
            return Err(e);
        }
        let planned_wire = plan_resp.planned_state.unwrap_or_default();

        let apply_resp = entry
            .client
            .apply_resource_change(type_name, prior_wire, planned_wire, cfg_wire, plan_resp.planned_private)
            .await?;
        if let Some(e) = diagnostics_error("apply", &apply_resp.diagnostics) {
            return Err(e);
        }
        let new_state = apply_resp.new_state.unwrap_or_default();
        let decoded = decode_wire(&new_state, t)?;
        infractl_core::value::typed_to_untyped(&decoded)
    }

    /// `Delete(state)`: plans the resource's removal (proposed new state is
    /// `Null`) and applies it.
    #[instrument(skip(self, state), fields(full_name = %provider.full_name(), resource_type = type_name))]
    pub async fn delete(&self, provider: &ProviderConfig, type_name: &str, state: &Untyped) -> Result<()> {
        let entry = self.ensure_loaded(provider).await?;
        let t = Self::resource_type(&entry, type_name)?;
        let prior = infractl_core::value::untyped_to_typed(state, &t)?;
        let null_value = Value::Null(t.clone());

        let prior_wire = encode_wire(&prior)?;
        let null_wire = encode_wire(&null_value)?;

        let plan_resp = entry
            .client
            .plan_resource_change(type_name, prior_wire.clone(), null_wire.clone(), null_wire.clone(), Vec::new())
            .await?;
        if let Some(e) = diagnostics_error("plan", &plan_resp.diagnostics) {
            return Err(e);
        }
        let planned_wire = plan_resp.planned_state.unwrap_or(null_wire.clone());

        let apply_resp = entry
            .client
            .apply_resource_change(type_name, prior_wire, planned_wire, null_wire, plan_resp.planned_private)
            .await?;
        if let Some(e) = diagnostics_error("apply", &apply_resp.diagnostics) {
            return Err(e);
        }
        Ok(())
    }

    /// `Refresh(currentState) -> newState`.
    #[instrument(skip(self, current_state), fields(full_name = %provider.full_name(), resource_type = type_name))]
    pub async fn refresh(&self, provider: &ProviderConfig, type_name: &str, current_state: &Untyped) -> Result<Untyped> {
        let entry = self.ensure_loaded(provider).await?;
        let t = Self::resource_type(&entry, type_name)?;
        let prior = infractl_core::value::untyped_to_typed(current_state, &t)?;
        let resp = entry.client.read_resource(type_name, encode_wire(&prior)?, Vec::new()).await?;
        if let Some(e) = diagnostics_error("read", &resp.diagnostics) {
            return Err(e);
        }
        let new_state = resp.new_state.unwrap_or_default();
        let decoded = decode_wire(&new_state, &t)?;
        infractl_core::value::typed_to_untyped(&decoded)
    }

    /// `Import(importId) -> newState`. Returns [`Error::ImportEmpty`] if the
    /// provider reports no matching resource.
    #[instrument(skip(self), fields(full_name = %provider.full_name(), resource_type = type_name))]
    pub async fn import(&self, provider: &ProviderConfig, type_name: &str, import_id: &str) -> Result<Untyped> {
        let entry = self.ensure_loaded(provider).await?;
        let t = Self::resource_type(&entry, type_name)?;

        let resp = entry.client.import_resource(type_name, import_id).await?;
        if let Some(e) = diagnostics_error("import", &resp.diagnostics) {
            return Err(e);
        }
        let imported = resp
            .resources
            .into_iter()
            .next()
            .ok_or_else(|| Error::ImportEmpty { import_id: import_id.to_string() })?;
        let state = imported.state.ok_or_else(|| Error::ImportEmpty { import_id: import_id.to_string() })?;

        let read_resp = entry.client.read_resource(type_name, state, imported.private).await?;
        if let Some(e) = diagnostics_error("read", &read_resp.diagnostics) {
            return Err(e);
        }
        let new_state = read_resp.new_state.unwrap_or_default();
        let decoded = decode_wire(&new_state, &t)?;
        infractl_core::value::typed_to_untyped(&decoded)
    }

    /// `ReadDataSource(config) -> state`.
    #[instrument(skip(self, config_data), fields(full_name = %provider.full_name(), data_source_type = type_name))]
    pub async fn read_data_source(&self, provider: &ProviderConfig, type_name: &str, config_data: &Untyped) -> Result<Untyped> {
        let entry = self.ensure_loaded(provider).await?;
        let t = Self::data_source_type(&entry, type_name)?;
        let cfg = infractl_core::value::untyped_to_typed(config_data, &t)?;
        let resp = entry.client.read_data_source(type_name, encode_wire(&cfg)?).await?;
        if let Some(e) = diagnostics_error("read_data_source", &resp.diagnostics) {
            return Err(e);
        }
        let state = resp.state.unwrap_or_default();
        let decoded = decode_wire(&state, &t)?;
        infractl_core::value::typed_to_untyped(&decoded)
    }

    /// Returns the human-readable schema of a loaded provider, loading it
    /// first if necessary.
    pub async fn describe(&self, provider: &ProviderConfig) -> Result<ProviderSchema> {
        Ok(self.ensure_loaded(provider).await?.schema.clone())
    }

    /// `Cleanup()`: closes every loaded provider's subprocess and empties the
    /// cache. Idempotent; safe to call multiple times and from a shutdown
    /// handler even if some providers were never loaded.
    #[instrument(skip(self))]
    pub async fn cleanup(&self) {
        let entries: Vec<Arc<Entry>> = self.providers.iter().map(|kv| kv.value().clone()).collect();
        for entry in entries {
            if let Err(e) = entry.client.close().await {
                warn!(error = %e, "error closing provider subprocess during cleanup");
            }
        }
        self.providers.clear();
    }
}

fn diagnostics_error(operation: &str, diagnostics: &[Diagnostic]) -> Option<Error> {
    let messages: Vec<String> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error as i32)
        .map(|d| {
            if d.detail.is_empty() {
                d.summary.clone()
            } else {
                format!("{}: {}", d.summary, d.detail)
            }
        })
        .collect();
    if messages.is_empty() {
        return None;
    }
    Some(Error::ProviderDiagnosticError { operation: operation.to_string(), message: messages.join("; ") })
}

fn raw_block_from_proto(s: &proto::Schema) -> RawBlock {
    s.block.as_ref().map_or_else(RawBlock::default, raw_block_from_proto_block)
}

fn raw_block_from_proto_block(block: &proto::SchemaBlock) -> RawBlock {
    RawBlock {
        attributes: block.attributes.iter().map(raw_attribute_from_proto).collect(),
        block_types: block.block_types.iter().map(raw_nested_block_from_proto).collect(),
    }
}

fn raw_attribute_from_proto(a: &proto::SchemaAttribute) -> RawAttribute {
    let attr_type = decode_cty_type(&a.r#type);
    RawAttribute {
        name: a.name.clone(),
        attr_type,
        description: (!a.description.is_empty()).then(|| a.description.clone()),
        required: a.required,
        optional: a.optional,
        computed: a.computed,
        sensitive: a.sensitive,
        deprecated: a.deprecated,
        write_only: a.write_only,
        nested_type: a.nested_type.as_deref().map(raw_nested_type_from_proto),
    }
}

fn raw_nested_type_from_proto(n: &proto::SchemaNestedType) -> RawNestedType {
    RawNestedType {
        attributes: n.attributes.iter().map(raw_attribute_from_proto).collect(),
        nesting: nesting_mode_from_proto(n.nesting),
    }
}

fn raw_nested_block_from_proto(b: &proto::SchemaNestedBlock) -> RawNestedBlock {
    RawNestedBlock {
        type_name: b.type_name.clone(),
        block: b.block.as_deref().map_or_else(RawBlock::default, raw_block_from_proto_block),
        nesting: nesting_mode_from_proto(b.nesting),
        min_items: (b.min_items != 0).then_some(b.min_items),
        max_items: (b.max_items != 0).then_some(b.max_items),
    }
}

fn nesting_mode_from_proto(n: i32) -> schema::NestingMode {
    match proto::NestingMode::try_from(n).unwrap_or(proto::NestingMode::Invalid) {
        proto::NestingMode::Single | proto::NestingMode::Invalid => schema::NestingMode::Single,
        proto::NestingMode::Group => schema::NestingMode::Group,
        proto::NestingMode::List => schema::NestingMode::List,
        proto::NestingMode::Set => schema::NestingMode::Set,
        proto::NestingMode::Map => schema::NestingMode::Map,
    }
}

fn decode_cty_type(bytes: &[u8]) -> Type {
    serde_json::from_slice::<serde_json::Value>(bytes).map_or(Type::Dynamic, |v| schema::parse_cty_type(&v))
}
