mod config;
mod deploy_cmd;
#[cfg(test)]
mod test_util;

use clap::Parser;

use cfn_deploy_core::{DeployRequest, PipelineError};

use config::{ColorMode, DeployConfig, Overrides};

#[derive(Parser, Debug)]
#[command(
    name = "cfn-deploy",
    version,
    about = "Run `aws cloudformation deploy` and stream stack events while it runs"
)]
struct Cli {
    /// Name of the CloudFormation stack to deploy
    #[arg(short = 's', long)]
    stack_name: String,

    /// Path to the template file
    #[arg(short = 't', long)]
    template_file: String,

    /// AWS profile (defaults to aws.profile in the config file)
    #[arg(short = 'p', long)]
    profile: Option<String>,

    /// AWS region (defaults to aws.region in the config file)
    #[arg(long)]
    region: Option<String>,

    /// Template parameter overrides as Key=Value pairs
    #[arg(
        long = "parameter-overrides",
        visible_alias = "params",
        num_args = 1..,
        value_name = "KEY=VALUE"
    )]
    parameter_overrides: Vec<String>,

    /// Capabilities to acknowledge, e.g. CAPABILITY_IAM
    #[arg(long, num_args = 1..)]
    capabilities: Vec<String>,

    /// Pass --debug to the aws cli and log at debug level
    #[arg(long)]
    debug: bool,

    /// KMS key used to encrypt artifacts uploaded to S3
    #[arg(long)]
    kms_key_id: Option<String>,

    /// S3 bucket for templates larger than 51,200 bytes
    #[arg(long)]
    s3_bucket: Option<String>,

    /// Prefix for artifacts uploaded to S3
    #[arg(long)]
    s3_prefix: Option<String>,

    /// Upload artifacts even if they match existing ones in S3
    #[arg(long)]
    force_upload: bool,

    /// Path to the aws executable (overrides CFN_DEPLOY_AWS_CLI)
    #[arg(long, value_name = "PATH")]
    aws_cli: Option<String>,

    /// When to colorize stack events (overrides CFN_DEPLOY_COLOR)
    #[arg(long, value_enum)]
    color: Option<ColorMode>,

    /// Milliseconds between stack event queries
    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            aws_cli: self.aws_cli.clone(),
            profile: self.profile.clone(),
            region: self.region.clone(),
            color: self.color,
            poll_interval_ms: self.poll_interval_ms,
        }
    }

    fn into_request(self) -> DeployRequest {
        DeployRequest {
            stack_name: self.stack_name,
            template_file: self.template_file,
            profile: self.profile,
            region: self.region,
            parameter_overrides: self.parameter_overrides,
            capabilities: self.capabilities,
            kms_key_id: self.kms_key_id,
            s3_bucket: self.s3_bucket,
            s3_prefix: self.s3_prefix,
            force_upload: self.force_upload,
            debug: self.debug,
        }
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = DeployConfig::resolve(&cli.overrides())?;
    let request = cli.into_request();

    match deploy_cmd::run_deploy(request, &config).await {
        Ok(_) => Ok(()),
        Err(e) => {
            // The aws cli already printed its own error on stderr.
            if let Some(PipelineError::Exit { code: Some(code) }) =
                e.downcast_ref::<PipelineError>()
            {
                tracing::error!(code = *code, "deploy failed");
                std::process::exit(*code);
            }
            Err(e)
        }
    }
}
