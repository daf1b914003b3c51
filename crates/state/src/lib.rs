//! The durable state store: resource state, the dependency graph between
//! resources, the lifecycle timeline, and per-resource operation history,
//! all backed by a single embedded SQLite database.

pub mod context;
pub mod query;
pub mod store;

pub use context::with_operation;
pub use query::{ListOperationsArgs, TimelineQuery, TimelineResponse};
pub use store::StateStore;

#[cfg(test)]
mod tests {
    use super::*;
    use infractl_core::model::{DependencyEdge, DependencyType, Operation, ProviderConfig, StateRecord};
    use infractl_core::value::Untyped;

    async fn open_temp() -> (StateStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state.db")).await.unwrap();
        (store, dir)
    }

    fn sample_record(id: &str) -> StateRecord {
        StateRecord {
            resource_id: id.to_string(),
            provider: "hashicorp/random".to_string(),
            provider_version: "3.7.2".to_string(),
            resource_type: "random_id".to_string(),
            state: serde_json::json!({"id": id}),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_and_get_state_round_trips() {
        let (store, _dir) = open_temp().await;
        let rec = sample_record("alpha");
        store.save_state(&rec).await.unwrap();
        let fetched = store.get_state("alpha").await.unwrap().expect("present");
        assert_eq!(fetched.state, rec.state);
        assert!(store.get_state("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_state_without_ambient_context_emits_no_timeline_event() {
        let (store, _dir) = open_temp().await;
        store.save_state(&sample_record("alpha")).await.unwrap();
        let timeline = store.get_timeline(&TimelineQuery::default()).await.unwrap();
        assert_eq!(timeline.total_count, 0);
    }

    #[tokio::test]
    async fn save_state_with_ambient_context_emits_a_timeline_event() {
        let (store, _dir) = open_temp().await;
        let rec = sample_record("alpha");
        context::with_operation(Operation::Create, "test-actor", async {
            store.save_state(&rec).await.unwrap();
        })
        .await;
        let timeline = store.get_timeline(&TimelineQuery::default()).await.unwrap();
        assert_eq!(timeline.total_count, 1);
        assert_eq!(timeline.events[0].changed_by, "test-actor");
        assert_eq!(timeline.events[0].resource_id.as_deref(), Some("alpha"));
    }

    #[tokio::test]
    async fn delete_state_cascades_dependency_edges() {
        let (store, _dir) = open_temp().await;
        store.save_state(&sample_record("alpha")).await.unwrap();
        store.save_state(&sample_record("beta")).await.unwrap();
        store
            .add_dependency(&DependencyEdge {
                from_resource_id: "alpha".to_string(),
                to_resource_id: "beta".to_string(),
                dependency_type: DependencyType::Explicit,
                explanation: "alpha references beta's id".to_string(),
                field_mappings: vec![],
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        store.delete_state("beta").await.unwrap();
        assert!(store.get_dependencies("alpha").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_dependency_with_missing_endpoint_is_an_integrity_error() {
        let (store, _dir) = open_temp().await;
        store.save_state(&sample_record("alpha")).await.unwrap();
        let result = store
            .add_dependency(&DependencyEdge {
                from_resource_id: "alpha".to_string(),
                to_resource_id: "does-not-exist".to_string(),
                dependency_type: DependencyType::Implicit,
                explanation: "x".to_string(),
                field_mappings: vec![],
                created_at: chrono::Utc::now(),
            })
            .await;
        assert!(matches!(result, Err(infractl_core::Error::IntegrityError { .. })));
    }

    #[tokio::test]
    async fn timeline_paging_reports_has_more() {
        let (store, _dir) = open_temp().await;
        for i in 0..3 {
            let rec = sample_record(&format!("r{i}"));
            context::with_operation(Operation::Create, "test-actor", async {
                store.save_state(&rec).await.unwrap();
            })
            .await;
        }
        let query = TimelineQuery { limit: Some(2), offset: Some(0), ..Default::default() };
        let page = store.get_timeline(&query).await.unwrap();
        assert_eq!(page.events.len(), 2);
        assert_eq!(page.total_count, 3);
        assert!(page.has_more);
    }

    #[tokio::test]
    async fn resource_operations_latest_first() {
        let (store, _dir) = open_temp().await;
        let provider = ProviderConfig::new("hashicorp/random", "3.7.2", Untyped::Null).unwrap();
        for i in 0..2 {
            let op = infractl_core::model::ResourceOperation {
                id: format!("op-{i}"),
                resource_id: "alpha".to_string(),
                resource_type: "random_id".to_string(),
                provider: provider.name.clone(),
                provider_version: provider.version.clone(),
                operation: Operation::Update,
                current_state: None,
                proposed_state: None,
                created_at: chrono::Utc::now(),
                failed: None,
            };
            store.save_resource_operation(&op).await.unwrap();
        }
        let latest = store.get_resource_operation("alpha").await.unwrap().expect("present");
        assert_eq!(latest.id, "op-1");
    }
}
