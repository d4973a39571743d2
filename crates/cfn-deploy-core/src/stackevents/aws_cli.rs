//! Event queries backed by the `aws` executable.
//!
//! Shells out to `aws cloudformation describe-stack-events --output json`
//! and parses the JSON, so no credentials handling lives in this crate: the
//! CLI resolves profiles, SSO caches and regions the same way it does for
//! the deploy itself.

use std::process::Output;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use super::{EventSource, QueryError, RawStackEvent, SessionError, SessionFactory, SessionOptions};

/// Default `--max-items` for `describe-stack-events`.
pub const DEFAULT_MAX_ITEMS: u32 = 100;

#[derive(Debug, Deserialize)]
struct DescribeStackEventsOutput {
    #[serde(rename = "StackEvents", default)]
    stack_events: Vec<RawStackEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CallerIdentity {
    #[serde(default)]
    account: String,
    #[serde(default)]
    arn: String,
}

/// Parse the JSON printed by `describe-stack-events`.
pub fn parse_stack_events(stdout: &[u8]) -> Result<Vec<RawStackEvent>, serde_json::Error> {
    let output: DescribeStackEventsOutput = serde_json::from_slice(stdout)?;
    Ok(output.stack_events)
}

/// Build an `aws` invocation carrying the profile/region selection.
fn aws_command(cli: &str, options: &SessionOptions) -> Command {
    let mut cmd = Command::new(cli);
    if let Some(profile) = &options.profile {
        cmd.arg("--profile").arg(profile);
    }
    if let Some(region) = &options.region {
        cmd.arg("--region").arg(region);
    }
    // Never page JSON output through `less`.
    cmd.env("AWS_PAGER", "");
    cmd.stdin(std::process::Stdio::null());
    cmd.kill_on_drop(true);
    cmd
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// [`EventSource`] that runs `aws cloudformation describe-stack-events`.
#[derive(Debug, Clone)]
pub struct AwsCliEventSource {
    cli: String,
    options: SessionOptions,
    max_items: u32,
}

impl AwsCliEventSource {
    pub fn new(cli: impl Into<String>, options: SessionOptions) -> Self {
        Self {
            cli: cli.into(),
            options,
            max_items: DEFAULT_MAX_ITEMS,
        }
    }

    /// Cap the number of events returned per query (newest first).
    pub fn with_max_items(mut self, max_items: u32) -> Self {
        self.max_items = max_items.max(1);
        self
    }
}

#[async_trait]
impl EventSource for AwsCliEventSource {
    async fn describe_stack_events(
        &self,
        stack_name: &str,
    ) -> Result<Vec<RawStackEvent>, QueryError> {
        let output = aws_command(&self.cli, &self.options)
            .args(["cloudformation", "describe-stack-events", "--output", "json"])
            .arg("--stack-name")
            .arg(stack_name)
            .arg("--max-items")
            .arg(self.max_items.to_string())
            .output()
            .await
            .map_err(|source| QueryError::Spawn {
                program: self.cli.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(QueryError::Command {
                stack: stack_name.to_string(),
                status: output.status.to_string(),
                stderr: stderr_text(&output),
            });
        }

        Ok(parse_stack_events(&output.stdout)?)
    }
}

/// [`SessionFactory`] that checks credentials with
/// `aws sts get-caller-identity` before handing out an
/// [`AwsCliEventSource`].
#[derive(Debug, Clone)]
pub struct AwsCliSessionFactory {
    cli: String,
    max_items: u32,
}

impl AwsCliSessionFactory {
    /// Create a factory that will look for `aws` on `$PATH`.
    pub fn new() -> Self {
        Self::with_binary("aws")
    }

    /// Use a custom `aws` binary path.
    pub fn with_binary(cli: impl Into<String>) -> Self {
        Self {
            cli: cli.into(),
            max_items: DEFAULT_MAX_ITEMS,
        }
    }

    pub fn with_max_items(mut self, max_items: u32) -> Self {
        self.max_items = max_items.max(1);
        self
    }
}

impl Default for AwsCliSessionFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionFactory for AwsCliSessionFactory {
    async fn connect(
        &self,
        options: &SessionOptions,
    ) -> Result<Arc<dyn EventSource>, SessionError> {
        let output = aws_command(&self.cli, options)
            .args(["sts", "get-caller-identity", "--output", "json"])
            .output()
            .await
            .map_err(|source| SessionError::Spawn {
                program: self.cli.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SessionError::Credentials {
                profile: options.profile.clone(),
                stderr: stderr_text(&output),
            });
        }

        match serde_json::from_slice::<CallerIdentity>(&output.stdout) {
            Ok(identity) => {
                info!(account = %identity.account, arn = %identity.arn, "aws session established");
            }
            Err(e) => {
                debug!(error = %e, "could not parse get-caller-identity output");
            }
        }

        let source = AwsCliEventSource::new(self.cli.clone(), options.clone())
            .with_max_items(self.max_items);
        Ok(Arc::new(source))
    }
}
