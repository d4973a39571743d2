//! CloudFormation stack events: the query interface, the fetcher that turns
//! provider output into chronological [`StackEvent`]s, and status lookup.
//!
//! # Architecture
//!
//! ```text
//! SessionFactory --connect(options)--> Arc<dyn EventSource>
//!                                           |
//!     fetch_since(source, since, stack) ----+--> describe_stack_events(stack)
//!          |                                       (newest first)
//!          v
//!     Vec<StackEvent> (oldest first, strictly newer than `since`)
//! ```

pub mod aws_cli;
pub mod status;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

pub use aws_cli::{AwsCliEventSource, AwsCliSessionFactory};
pub use status::StatusKind;

/// A stack event as the provider reports it.
///
/// Field names follow the `describe-stack-events` JSON output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawStackEvent {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub stack_name: String,
    pub timestamp: DateTime<Utc>,
    pub logical_resource_id: String,
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    pub resource_type: String,
    pub resource_status: String,
    #[serde(default)]
    pub resource_status_reason: Option<String>,
}

/// A stack event ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub logical_resource_id: String,
    pub physical_resource_id: String,
    pub resource_type: String,
    pub resource_status: String,
    /// Empty when the provider gave no reason.
    pub resource_status_reason: String,
}

impl StackEvent {
    pub fn status_kind(&self) -> StatusKind {
        StatusKind::of(&self.resource_status)
    }
}

impl From<RawStackEvent> for StackEvent {
    fn from(raw: RawStackEvent) -> Self {
        Self {
            event_id: raw.event_id,
            timestamp: raw.timestamp,
            logical_resource_id: raw.logical_resource_id,
            physical_resource_id: raw.physical_resource_id.unwrap_or_default(),
            resource_type: raw.resource_type,
            resource_status: raw.resource_status,
            resource_status_reason: raw.resource_status_reason.unwrap_or_default(),
        }
    }
}

/// A single failed stack event query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("describe-stack-events for {stack} failed ({status}): {stderr}")]
    Command {
        stack: String,
        status: String,
        stderr: String,
    },

    #[error("malformed describe-stack-events output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Failure to set up an authenticated context for event queries.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "could not establish aws session{for_profile}: {stderr}",
        for_profile = .profile.as_deref().map(|p| format!(" for profile {p}")).unwrap_or_default()
    )]
    Credentials {
        profile: Option<String>,
        stderr: String,
    },

    #[error("{0}")]
    Other(String),
}

/// Anything that can list the events of a stack.
///
/// Implementations return every event they know of for `stack_name`,
/// newest first, the way CloudFormation does.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn describe_stack_events(
        &self,
        stack_name: &str,
    ) -> Result<Vec<RawStackEvent>, QueryError>;
}

/// Settings used when establishing an event-query session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub profile: Option<String>,
    pub region: Option<String>,
}

/// Establishes the authenticated context an [`EventSource`] needs.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(
        &self,
        options: &SessionOptions,
    ) -> Result<Arc<dyn EventSource>, SessionError>;
}

// Compile-time assertion: both traits must be usable as trait objects.
const _: () = {
    fn _assert_object_safe(_: &dyn EventSource, _: &dyn SessionFactory) {}
};

/// Fetch the events of `stack` newer than `since`, oldest first.
///
/// Issues exactly one query. Events at or before `since` are dropped.
pub async fn fetch_since(
    source: &dyn EventSource,
    since: DateTime<Utc>,
    stack: &str,
) -> Result<Vec<StackEvent>, QueryError> {
    let raw = source.describe_stack_events(stack).await?;

    let events: Vec<StackEvent> = raw
        .into_iter()
        .rev()
        .filter(|e| e.timestamp > since)
        .map(StackEvent::from)
        .collect();

    tracing::debug!(stack, since = %since, count = events.len(), "fetched stack events");
    Ok(events)
}
