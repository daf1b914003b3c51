//! The durable record of resource state, the dependency graph between
//! resources, the timeline of lifecycle operations, and the per-resource
//! operation history.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

use infractl_core::model::{DependencyEdge, DependencyType, FieldMapping, ResourceOperation, StateRecord, TimelineEvent};
use infractl_core::{Error, Result};

use crate::context;
use crate::query::{ListOperationsArgs, TimelineQuery, TimelineResponse};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// The durable state store, backed by a single SQLite database file.
pub struct StateStore {
    pool: SqlitePool,
    /// Per-resource-id write latch: serializes `state_records`/`operations`/
    /// `timeline_events` writes for a given id without holding any
    /// cross-resource lock.
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl StateStore {
    /// Opens (creating if absent) the database file at `path` and runs
    /// pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the parent directory cannot be created, or a
    /// database-layer error wrapped as [`Error::IntegrityError`] if the
    /// connection or migrations fail.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| Error::IntegrityError { message: format!("invalid database path: {e}") })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| Error::IntegrityError { message: format!("failed to open state store: {e}") })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| Error::IntegrityError { message: format!("migration failed: {e}") })?;

        Ok(Self { pool, write_locks: DashMap::new() })
    }

    fn resource_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.write_locks.entry(id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// `SaveState(rec)`: upsert by id. Emits a timeline event iff an ambient
    /// operation/actor context is set for the calling task.
    #[instrument(skip(self, rec), fields(resource_id = %rec.resource_id))]
    pub async fn save_state(&self, rec: &StateRecord) -> Result<()> {
        let lock = self.resource_lock(&rec.resource_id);
        let _guard = lock.lock().await;

        let state_json = serde_json::to_string(&rec.state)?;
        sqlx::query(
            "INSERT INTO state_records (id, provider, provider_version, resource_type, state, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               provider = excluded.provider,
               provider_version = excluded.provider_version,
               resource_type = excluded.resource_type,
               state = excluded.state",
        )
        .bind(&rec.resource_id)
        .bind(&rec.provider)
        .bind(&rec.provider_version)
        .bind(&rec.resource_type)
        .bind(&state_json)
        .bind(rec.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        self.emit_timeline_if_ambient(Some(rec.resource_id.clone())).await
    }

    /// `GetState(id)`: `None` when absent, not an error.
    #[instrument(skip(self))]
    pub async fn get_state(&self, id: &str) -> Result<Option<StateRecord>> {
        let row = sqlx::query("SELECT id, provider, provider_version, resource_type, state, created_at FROM state_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?;
        row.map(|r| row_to_state_record(&r)).transpose()
    }

    /// `state-list`: every persisted state record, newest-first.
    #[instrument(skip(self))]
    pub async fn list_states(&self) -> Result<Vec<StateRecord>> {
        let rows = sqlx::query("SELECT id, provider, provider_version, resource_type, state, created_at FROM state_records ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;
        rows.iter().map(row_to_state_record).collect()
    }

    /// `DeleteState(id)`: dependency edges referencing `id` cascade. Emits a
    /// timeline event iff an ambient operation/actor context is set.
    #[instrument(skip(self))]
    pub async fn delete_state(&self, id: &str) -> Result<()> {
        let lock = self.resource_lock(id);
        let _guard = lock.lock().await;

        sqlx::query("DELETE FROM state_records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(database_error)?;

        self.emit_timeline_if_ambient(Some(id.to_string())).await
    }

    async fn emit_timeline_if_ambient(&self, resource_id: Option<String>) -> Result<()> {
        let Some((operation, changed_by)) = context::current() else { return Ok(()) };
        let event = TimelineEvent {
            id: time_ordered_id(),
            resource_id,
            operation,
            changed_by,
            created_at: Utc::now(),
        };
        sqlx::query("INSERT INTO timeline_events (id, resource_id, operation, changed_by, created_at) VALUES (?, ?, ?, ?, ?)")
            .bind(&event.id)
            .bind(&event.resource_id)
            .bind(operation_tag(event.operation))
            .bind(&event.changed_by)
            .bind(event.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(database_error)?;
        Ok(())
    }

    /// `AddDependency(edge)`: upsert by `(from,to)`. A foreign-key violation
    /// (either endpoint missing a `state_records` row) surfaces as
    /// [`Error::IntegrityError`].
    #[instrument(skip(self, edge), fields(from = %edge.from_resource_id, to = %edge.to_resource_id))]
    pub async fn add_dependency(&self, edge: &DependencyEdge) -> Result<()> {
        let mappings_json = serde_json::to_string(&edge.field_mappings)?;
        sqlx::query(
            "INSERT INTO dependency_edges (from_id, to_id, dependency_type, explanation, field_mappings, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(from_id, to_id) DO UPDATE SET
               dependency_type = excluded.dependency_type,
               explanation = excluded.explanation,
               field_mappings = excluded.field_mappings",
        )
        .bind(&edge.from_resource_id)
        .bind(&edge.to_resource_id)
        .bind(dependency_type_tag(edge.dependency_type))
        .bind(&edge.explanation)
        .bind(&mappings_json)
        .bind(edge.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(database_error)?;
        Ok(())
    }

    /// `GetDependencies(id)`: edges where `from=id`, oldest-first.
    #[instrument(skip(self))]
    pub async fn get_dependencies(&self, id: &str) -> Result<Vec<DependencyEdge>> {
        let rows = sqlx::query(
            "SELECT from_id, to_id, dependency_type, explanation, field_mappings, created_at
             FROM dependency_edges WHERE from_id = ? ORDER BY created_at ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(database_error)?;
        rows.iter().map(row_to_dependency_edge).collect()
    }

    /// `GetDependents(id)`: edges where `to=id`, oldest-first.
    #[instrument(skip(self))]
    pub async fn get_dependents(&self, id: &str) -> Result<Vec<DependencyEdge>> {
        let rows = sqlx::query(
            "SELECT from_id, to_id, dependency_type, explanation, field_mappings, created_at
             FROM dependency_edges WHERE to_id = ? ORDER BY created_at ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(database_error)?;
        rows.iter().map(row_to_dependency_edge).collect()
    }

    /// Removes a single dependency edge. Used by `lifecycle-resources-dependencies-remove`.
    #[instrument(skip(self))]
    pub async fn remove_dependency(&self, from_id: &str, to_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM dependency_edges WHERE from_id = ? AND to_id = ?")
            .bind(from_id)
            .bind(to_id)
            .execute(&self.pool)
            .await
            .map_err(database_error)?;
        Ok(())
    }

    /// `GetTimeline(query)`.
    #[instrument(skip(self))]
    pub async fn get_timeline(&self, query: &TimelineQuery) -> Result<TimelineResponse> {
        let limit = query.limit();
        let offset = query.offset();

        let mut where_clauses = Vec::new();
        if query.resource_id.is_some() {
            where_clauses.push("resource_id = ?");
        }
        if query.from_time.is_some() {
            where_clauses.push("created_at >= ?");
        }
        if query.to_time.is_some() {
            where_clauses.push("created_at <= ?");
        }
        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", where_clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) as n FROM timeline_events{where_sql}");
        let mut count_query = sqlx::query(&count_sql);
        count_query = bind_timeline_filters(count_query, query);
        let total_count: i64 = count_query.fetch_one(&self.pool).await.map_err(database_error)?.try_get("n").map_err(database_error)?;

        let page_sql =
            format!("SELECT id, resource_id, operation, changed_by, created_at FROM timeline_events{where_sql} ORDER BY created_at DESC LIMIT ? OFFSET ?");
        let mut page_query = sqlx::query(&page_sql);
        page_query = bind_timeline_filters(page_query, query);
        page_query = page_query.bind(limit).bind(offset);
        let rows = page_query.fetch_all(&self.pool).await.map_err(database_error)?;

        let events = rows.iter().map(row_to_timeline_event).collect::<Result<Vec<_>>>()?;
        let has_more = offset + events.len() as i64 < total_count;
        Ok(TimelineResponse { events, total_count, has_more })
    }

    /// `SaveResourceOperation(op)`.
    #[instrument(skip(self, op), fields(resource_id = %op.resource_id))]
    pub async fn save_resource_operation(&self, op: &ResourceOperation) -> Result<()> {
        let lock = self.resource_lock(&op.resource_id);
        let _guard = lock.lock().await;

        let current_json = op.current_state.as_ref().map(serde_json::to_string).transpose()?;
        let proposed_json = op.proposed_state.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            "INSERT INTO operations (id, resource_id, resource_type, provider, provider_version, operation, current_state, proposed_state, created_at, failed)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&op.id)
        .bind(&op.resource_id)
        .bind(&op.resource_type)
        .bind(&op.provider)
        .bind(&op.provider_version)
        .bind(operation_tag(op.operation))
        .bind(current_json)
        .bind(proposed_json)
        .bind(op.created_at.to_rfc3339())
        .bind(&op.failed)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;
        Ok(())
    }

    /// `ListResourceOperations(args)`.
    #[instrument(skip(self))]
    pub async fn list_resource_operations(&self, args: &ListOperationsArgs) -> Result<Vec<ResourceOperation>> {
        let mut where_clauses = Vec::new();
        if args.resource_id.is_some() {
            where_clauses.push("resource_id = ?");
        }
        if args.resource_type.is_some() {
            where_clauses.push("resource_type = ?");
        }
        if args.provider.is_some() {
            where_clauses.push("provider = ?");
        }
        if args.provider_version.is_some() {
            where_clauses.push("provider_version = ?");
        }
        let where_sql = if where_clauses.is_empty() { String::new() } else { format!(" WHERE {}", where_clauses.join(" AND ")) };
        let sql = format!(
            "SELECT id, resource_id, resource_type, provider, provider_version, operation, current_state, proposed_state, created_at, failed
             FROM operations{where_sql} ORDER BY created_at DESC LIMIT ? OFFSET ?"
        );

        let mut q = sqlx::query(&sql);
        if let Some(v) = &args.resource_id {
            q = q.bind(v);
        }
        if let Some(v) = &args.resource_type {
            q = q.bind(v);
        }
        if let Some(v) = &args.provider {
            q = q.bind(v);
        }
        if let Some(v) = &args.provider_version {
            q = q.bind(v);
        }
        q = q.bind(args.limit()).bind(args.offset());

        let rows = q.fetch_all(&self.pool).await.map_err(database_error)?;
        rows.iter().map(row_to_resource_operation).collect()
    }

    /// `GetResourceOperation(resourceID)`: the latest operation by created_at.
    #[instrument(skip(self))]
    pub async fn get_resource_operation(&self, resource_id: &str) -> Result<Option<ResourceOperation>> {
        let row = sqlx::query(
            "SELECT id, resource_id, resource_type, provider, provider_version, operation, current_state, proposed_state, created_at, failed
             FROM operations WHERE resource_id = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?;
        row.as_ref().map(row_to_resource_operation).transpose()
    }
}

fn bind_timeline_filters<'q>(
    mut q: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    query: &'q TimelineQuery,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    if let Some(v) = &query.resource_id {
        q = q.bind(v);
    }
    if let Some(v) = &query.from_time {
        q = q.bind(v.to_rfc3339());
    }
    if let Some(v) = &query.to_time {
        q = q.bind(v.to_rfc3339());
    }
    q
}

fn time_ordered_id() -> String {
    Uuid::now_v7().to_string()
}

fn operation_tag(op: infractl_core::model::Operation) -> &'static str {
    use infractl_core::model::Operation;
    match op {
        Operation::Create => "create",
        Operation::Update => "update",
        Operation::Delete => "delete",
        Operation::Import => "import",
        Operation::Eject => "eject",
        Operation::Refresh => "refresh",
    }
}

fn parse_operation_tag(tag: &str) -> Result<infractl_core::model::Operation> {
    use infractl_core::model::Operation;
    match tag {
        "create" => Ok(Operation::Create),
        "update" => Ok(Operation::Update),
        "delete" => Ok(Operation::Delete),
        "import" => Ok(Operation::Import),
        "eject" => Ok(Operation::Eject),
        "refresh" => Ok(Operation::Refresh),
        other => Err(Error::IntegrityError { message: format!("unrecognized operation tag {other:?} in state store") }),
    }
}

fn dependency_type_tag(t: DependencyType) -> &'static str {
    match t {
        DependencyType::Explicit => "explicit",
        DependencyType::Implicit => "implicit",
        DependencyType::DataSource => "data_source",
    }
}

fn parse_dependency_type_tag(tag: &str) -> Result<DependencyType> {
    match tag {
        "explicit" => Ok(DependencyType::Explicit),
        "implicit" => Ok(DependencyType::Implicit),
        "data_source" => Ok(DependencyType::DataSource),
        other => Err(Error::IntegrityError { message: format!("unrecognized dependency type tag {other:?} in state store") }),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::IntegrityError { message: format!("invalid timestamp {raw:?} in state store: {e}") })
}

fn row_to_state_record(row: &sqlx::sqlite::SqliteRow) -> Result<StateRecord> {
    let state_raw: String = row.try_get("state").map_err(database_error)?;
    Ok(StateRecord {
        resource_id: row.try_get("id").map_err(database_error)?,
        provider: row.try_get("provider").map_err(database_error)?,
        provider_version: row.try_get("provider_version").map_err(database_error)?,
        resource_type: row.try_get("resource_type").map_err(database_error)?,
        state: serde_json::from_str(&state_raw)?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at").map_err(database_error)?)?,
    })
}

fn row_to_dependency_edge(row: &sqlx::sqlite::SqliteRow) -> Result<DependencyEdge> {
    let mappings_raw: String = row.try_get("field_mappings").map_err(database_error)?;
    let field_mappings: Vec<FieldMapping> = serde_json::from_str(&mappings_raw)?;
    Ok(DependencyEdge {
        from_resource_id: row.try_get("from_id").map_err(database_error)?,
        to_resource_id: row.try_get("to_id").map_err(database_error)?,
        dependency_type: parse_dependency_type_tag(&row.try_get::<String, _>("dependency_type").map_err(database_error)?)?,
        explanation: row.try_get("explanation").map_err(database_error)?,
        field_mappings,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at").map_err(database_error)?)?,
    })
}

fn row_to_timeline_event(row: &sqlx::sqlite::SqliteRow) -> Result<TimelineEvent> {
    Ok(TimelineEvent {
        id: row.try_get("id").map_err(database_error)?,
        resource_id: row.try_get("resource_id").map_err(database_error)?,
        operation: parse_operation_tag(&row.try_get::<String, _>("operation").map_err(database_error)?)?,
        changed_by: row.try_get("changed_by").map_err(database_error)?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at").map_err(database_error)?)?,
    })
}

fn row_to_resource_operation(row: &sqlx::sqlite::SqliteRow) -> Result<ResourceOperation> {
    let current_raw: Option<String> = row.try_get("current_state").map_err(database_error)?;
    let proposed_raw: Option<String> = row.try_get("proposed_state").map_err(database_error)?;
    Ok(ResourceOperation {
        id: row.try_get("id").map_err(database_error)?,
        resource_id: row.try_get("resource_id").map_err(database_error)?,
        resource_type: row.try_get("resource_type").map_err(database_error)?,
        provider: row.try_get("provider").map_err(database_error)?,
        provider_version: row.try_get("provider_version").map_err(database_error)?,
        operation: parse_operation_tag(&row.try_get::<String, _>("operation").map_err(database_error)?)?,
        current_state: current_raw.map(|s| serde_json::from_str(&s)).transpose()?,
        proposed_state: proposed_raw.map(|s| serde_json::from_str(&s)).transpose()?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at").map_err(database_error)?)?,
        failed: row.try_get("failed").map_err(database_error)?,
    })
}

fn database_error(err: sqlx::Error) -> Error {
    if let Some(db_err) = err.as_database_error() {
        if db_err.message().contains("FOREIGN KEY constraint failed") {
            return Error::IntegrityError {
                message: "dependency edge references a resource id with no state record".to_string(),
            };
        }
    }
    Error::IntegrityError { message: format!("state store error: {err}") }
}
