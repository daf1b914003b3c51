//! Query/response shapes for timeline and operation-history lookups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use infractl_core::model::TimelineEvent;

/// `GetTimeline(query)` parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimelineQuery {
    /// Restrict to events for this resource id.
    #[serde(default)]
    pub resource_id: Option<String>,
    /// Restrict to events created at or after this time.
    #[serde(default)]
    pub from_time: Option<DateTime<Utc>>,
    /// Restrict to events created at or before this time.
    #[serde(default)]
    pub to_time: Option<DateTime<Utc>>,
    /// Maximum events to return. Defaults to 50.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Offset into the newest-first ordering. Defaults to 0.
    #[serde(default)]
    pub offset: Option<i64>,
}

impl TimelineQuery {
    pub(crate) fn limit(&self) -> i64 {
        self.limit.unwrap_or(50)
    }

    pub(crate) fn offset(&self) -> i64 {
        self.offset.unwrap_or(0)
    }
}

/// `GetTimeline` result: a page of events plus enough bookkeeping for the
/// caller to know whether more pages exist.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineResponse {
    /// Events in this page, newest-first.
    pub events: Vec<TimelineEvent>,
    /// Total events matching the filter, ignoring paging.
    pub total_count: i64,
    /// `offset + len(events) < total_count`.
    pub has_more: bool,
}

/// `ListResourceOperations(args)` parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListOperationsArgs {
    /// Restrict to this resource id.
    #[serde(default)]
    pub resource_id: Option<String>,
    /// Restrict to this resource type.
    #[serde(default)]
    pub resource_type: Option<String>,
    /// Restrict to this provider name.
    #[serde(default)]
    pub provider: Option<String>,
    /// Restrict to this provider version.
    #[serde(default)]
    pub provider_version: Option<String>,
    /// Maximum operations to return. Defaults to 50.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Offset into the newest-first ordering. Defaults to 0.
    #[serde(default)]
    pub offset: Option<i64>,
}

impl ListOperationsArgs {
    pub(crate) fn limit(&self) -> i64 {
        self.limit.unwrap_or(50)
    }

    pub(crate) fn offset(&self) -> i64 {
        self.offset.unwrap_or(0)
    }
}
