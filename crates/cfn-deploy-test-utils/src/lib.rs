//! Shared test doubles for cfn-deploy integration tests.
//!
//! - [`ScriptedEventSource`]: an [`EventSource`] returning fixtures (or
//!   errors) and counting calls.
//! - [`FakeSessions`]: a [`SessionFactory`] that hands out a fixed source or
//!   always fails.
//! - [`FakeDeploy`]: an executable shell script standing in for `aws`.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cfn_deploy_core::stackevents::{
    EventSource, QueryError, RawStackEvent, SessionError, SessionFactory, SessionOptions,
};

/// Build a raw event with the given logical id, status and timestamp.
pub fn raw_event(logical_id: &str, status: &str, timestamp: DateTime<Utc>) -> RawStackEvent {
    RawStackEvent {
        event_id: format!("{logical_id}-{status}-{}", timestamp.timestamp_millis()),
        stack_name: "test-stack".to_string(),
        timestamp,
        logical_resource_id: logical_id.to_string(),
        physical_resource_id: Some(format!("test-stack-{}", logical_id.to_lowercase())),
        resource_type: "AWS::CloudFormation::Stack".to_string(),
        resource_status: status.to_string(),
        resource_status_reason: None,
    }
}

/// One scripted response.
#[derive(Debug, Clone)]
pub enum Response {
    Events(Vec<RawStackEvent>),
    Fail(String),
}

/// [`EventSource`] that replays scripted responses.
///
/// Responses are consumed in order; once only one is left it is repeated
/// forever. With no responses at all every call returns an empty list.
#[derive(Debug, Default)]
pub struct ScriptedEventSource {
    responses: Mutex<VecDeque<Response>>,
    calls: AtomicUsize,
    stacks: Mutex<Vec<String>>,
}

impl ScriptedEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always return `events` (newest first).
    pub fn with_events(events: Vec<RawStackEvent>) -> Self {
        Self::new().then(Response::Events(events))
    }

    /// Always fail with `message`.
    pub fn failing(message: &str) -> Self {
        Self::new().then(Response::Fail(message.to_string()))
    }

    /// Queue another response.
    pub fn then(self, response: Response) -> Self {
        self.responses
            .lock()
            .expect("responses lock poisoned")
            .push_back(response);
        self
    }

    /// Number of queries made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Stack names queried, in order.
    pub fn stacks(&self) -> Vec<String> {
        self.stacks.lock().expect("stacks lock poisoned").clone()
    }
}

#[async_trait]
impl EventSource for ScriptedEventSource {
    async fn describe_stack_events(
        &self,
        stack_name: &str,
    ) -> Result<Vec<RawStackEvent>, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.stacks
            .lock()
            .expect("stacks lock poisoned")
            .push(stack_name.to_string());

        let response = {
            let mut responses = self.responses.lock().expect("responses lock poisoned");
            if responses.len() > 1 {
                responses.pop_front()
            } else {
                responses.front().cloned()
            }
        };

        match response {
            None => Ok(Vec::new()),
            Some(Response::Events(events)) => Ok(events),
            Some(Response::Fail(message)) => Err(QueryError::Other(message)),
        }
    }
}

/// [`SessionFactory`] for tests.
#[derive(Debug)]
pub struct FakeSessions {
    source: Option<Arc<ScriptedEventSource>>,
    connects: AtomicUsize,
    options: Mutex<Vec<SessionOptions>>,
}

impl FakeSessions {
    /// Every connect succeeds and yields `source`.
    pub fn ok(source: Arc<ScriptedEventSource>) -> Arc<Self> {
        Arc::new(Self {
            source: Some(source),
            connects: AtomicUsize::new(0),
            options: Mutex::new(Vec::new()),
        })
    }

    /// Every connect fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            source: None,
            connects: AtomicUsize::new(0),
            options: Mutex::new(Vec::new()),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Options passed to each connect, in order.
    pub fn options(&self) -> Vec<SessionOptions> {
        self.options.lock().expect("options lock poisoned").clone()
    }
}

#[async_trait]
impl SessionFactory for FakeSessions {
    async fn connect(
        &self,
        options: &SessionOptions,
    ) -> Result<Arc<dyn EventSource>, SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.options
            .lock()
            .expect("options lock poisoned")
            .push(options.clone());

        match &self.source {
            Some(source) => Ok(source.clone() as Arc<dyn EventSource>),
            None => Err(SessionError::Credentials {
                profile: options.profile.clone(),
                stderr: "Unable to locate credentials".to_string(),
            }),
        }
    }
}

/// A fake `aws` executable living in a temp dir.
///
/// The script body runs under `/bin/sh` and receives the deploy arguments
/// as `$@`.
pub struct FakeDeploy {
    _dir: tempfile::TempDir,
    path: PathBuf,
}

impl FakeDeploy {
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = write_script(dir.path(), "aws", body);
        Self { _dir: dir, path }
    }

    /// Path to the script, suitable for `DeployCommand::with_program`.
    pub fn program(&self) -> &str {
        self.path.to_str().expect("temp path is not UTF-8")
    }

    /// Location of the script; siblings of it can serve as marker files.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Write an executable `/bin/sh` script named `name` into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write script");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("failed to make script executable");
    }

    path
}

