//! The `aws cloudformation deploy` invocation.
//!
//! [`DeployRequest`] is the parsed user intent; [`DeployCommand`] turns it
//! into an argument list and launches the process with stdout and stderr
//! piped back to us.

use std::fmt;
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use crate::pipeline::PipelineError;

pub const AWS_CLI: &str = "aws";
pub const CFN_NAMESPACE: &str = "cloudformation";
pub const CFN_DEPLOY: &str = "deploy";

/// Everything needed to run one deploy. Built once, never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployRequest {
    pub stack_name: String,
    pub template_file: String,
    pub profile: Option<String>,
    pub region: Option<String>,
    /// `Key=Value` pairs.
    pub parameter_overrides: Vec<String>,
    pub capabilities: Vec<String>,
    pub kms_key_id: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_prefix: Option<String>,
    pub force_upload: bool,
    pub debug: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DeployArg {
    key: String,
    values: Vec<String>,
}

/// Argument list and executable for `aws cloudformation deploy`.
///
/// Flags keep the order they were first set in; setting a flag again
/// replaces its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployCommand {
    program: String,
    args: Vec<DeployArg>,
}

impl Default for DeployCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl DeployCommand {
    /// An empty deploy command run through `aws` on `$PATH`.
    pub fn new() -> Self {
        Self {
            program: AWS_CLI.to_string(),
            args: Vec::new(),
        }
    }

    /// Build the command for `request`. Empty strings and empty lists add
    /// no flag.
    pub fn from_request(request: &DeployRequest) -> Self {
        let mut cmd = Self::new();
        cmd.set_opt("stack-name", Some(request.stack_name.as_str()));
        cmd.set_opt("template-file", Some(request.template_file.as_str()));
        cmd.set_opt("profile", request.profile.as_deref());
        cmd.set_opt("region", request.region.as_deref());
        cmd.set_values("parameter-overrides", &request.parameter_overrides);
        cmd.set_values("capabilities", &request.capabilities);
        if request.debug {
            cmd.set_flag("debug");
        }
        if request.force_upload {
            cmd.set_flag("force-upload");
        }
        cmd.set_opt("kms-key-id", request.kms_key_id.as_deref());
        cmd.set_opt("s3-bucket", request.s3_bucket.as_deref());
        cmd.set_opt("s3-prefix", request.s3_prefix.as_deref());
        cmd
    }

    /// Run a different executable instead of `aws`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn set(&mut self, key: &str, values: Vec<String>) {
        match self.args.iter_mut().find(|a| a.key == key) {
            Some(existing) => existing.values = values,
            None => self.args.push(DeployArg {
                key: key.to_string(),
                values,
            }),
        }
    }

    fn set_opt(&mut self, key: &str, value: Option<&str>) {
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            self.set(key, vec![v.to_string()]);
        }
    }

    fn set_values(&mut self, key: &str, values: &[String]) {
        let values: Vec<String> = values.iter().filter(|v| !v.is_empty()).cloned().collect();
        if !values.is_empty() {
            self.set(key, values);
        }
    }

    /// Add a bare `--<key>` flag.
    pub fn set_flag(&mut self, key: &str) -> &mut Self {
        self.set(key, Vec::new());
        self
    }

    pub fn set_stack_name(&mut self, stack_name: &str) -> &mut Self {
        self.set_opt("stack-name", Some(stack_name));
        self
    }

    /// Full argument vector passed to the executable, starting with
    /// `cloudformation deploy`.
    pub fn aws_cli_args(&self) -> Vec<String> {
        let mut out = vec![CFN_NAMESPACE.to_string(), CFN_DEPLOY.to_string()];
        for arg in &self.args {
            out.push(format!("--{}", arg.key));
            out.extend(arg.values.iter().cloned());
        }
        out
    }

    /// Spawn the deploy with piped stdout and stderr.
    ///
    /// Both pipes are taken out of the child before returning. If either is
    /// missing the child is killed and [`PipelineError::Setup`] returned.
    pub async fn spawn(&self) -> Result<DeployProcess, PipelineError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.aws_cli_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| PipelineError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill().await;
            return Err(PipelineError::Setup { stream: "stdout" });
        };
        let Some(stderr) = child.stderr.take() else {
            let _ = child.kill().await;
            return Err(PipelineError::Setup { stream: "stderr" });
        };

        tracing::debug!(pid = child.id(), program = %self.program, "deploy process started");

        Ok(DeployProcess {
            child,
            stdout,
            stderr,
        })
    }
}

impl fmt::Display for DeployCommand {
    /// Shell-like rendering for logs: `cloudformation deploy --stack-name x`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.aws_cli_args().join(" "))
    }
}

/// A running deploy with its output streams detached from the child.
#[derive(Debug)]
pub struct DeployProcess {
    pub child: Child,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}
