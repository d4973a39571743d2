//! Wire the parsed flags and resolved config into one pipeline run.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use cfn_deploy_core::stackevents::AwsCliSessionFactory;
use cfn_deploy_core::{
    Console, DeployCommand, DeployRequest, PipelineReport, PollConfig, run_pipeline,
};

use crate::config::DeployConfig;

/// Fill in the profile and region the command line left out.
pub fn apply_defaults(mut request: DeployRequest, config: &DeployConfig) -> DeployRequest {
    request.profile = request.profile.or_else(|| config.profile.clone());
    request.region = request.region.or_else(|| config.region.clone());
    request
}

pub fn build_command(request: &DeployRequest, config: &DeployConfig) -> DeployCommand {
    DeployCommand::from_request(request).with_program(config.aws_cli.clone())
}

pub fn build_poll_config(request: &DeployRequest, config: &DeployConfig) -> PollConfig {
    PollConfig::for_request(request)
        .with_interval(config.poll_interval)
        .with_lookback(config.lookback)
}

/// Run the deploy against the real `aws` executable and terminal.
pub async fn run_deploy(request: DeployRequest, config: &DeployConfig) -> Result<PipelineReport> {
    let request = apply_defaults(request, config);
    let command = build_command(&request, config);
    let poll = build_poll_config(&request, config);
    let sessions = Arc::new(
        AwsCliSessionFactory::with_binary(config.aws_cli.clone()).with_max_items(config.max_items),
    );
    let console = Console::stdio(config.color);

    info!(stack = %request.stack_name, template = %request.template_file, "starting deploy");
    let report = run_pipeline(&command, sessions, poll, console).await?;
    debug!(
        lines = report.stdout_lines,
        fetches = report.poll.fetches,
        events = report.poll.events_rendered,
        exit = ?report.poll.exit,
        "deploy finished"
    );
    Ok(report)
}
