//! Integration tests for the deploy pipeline.
//!
//! Each test runs a fake `aws` shell script as the deploy subprocess and a
//! scripted event source in place of CloudFormation, then checks what
//! reached the console and what the poller reported.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use cfn_deploy_core::stackevents::SessionOptions;
use cfn_deploy_core::{
    Console, DeployCommand, DeployRequest, PipelineError, PollConfig, PollExit, Progress,
    SessionFactory, run_pipeline,
};
use cfn_deploy_test_utils::{FakeDeploy, FakeSessions, Response, ScriptedEventSource, raw_event};

// ===========================================================================
// Helpers
// ===========================================================================

fn request() -> DeployRequest {
    DeployRequest {
        stack_name: "test-stack".to_string(),
        template_file: "template.yaml".to_string(),
        profile: Some("dev".to_string()),
        ..Default::default()
    }
}

fn command(fake: &FakeDeploy) -> DeployCommand {
    DeployCommand::from_request(&request()).with_program(fake.program())
}

fn poll_config() -> PollConfig {
    PollConfig::for_request(&request()).with_interval(Duration::from_millis(10))
}

// ===========================================================================
// Happy path
// ===========================================================================

#[tokio::test]
async fn successful_deploy_streams_output_and_events() {
    let fake = FakeDeploy::new(
        "echo 'Waiting for changeset to be created..'\n\
         sleep 0.2\n\
         echo 'Waiting for stack create/update to complete'\n\
         sleep 0.2\n\
         echo 'Successfully created/updated stack'",
    );
    let now = Utc::now();
    let source = Arc::new(ScriptedEventSource::with_events(vec![
        raw_event("test-stack", "UPDATE_COMPLETE", now),
        raw_event("Bucket", "CREATE_COMPLETE", now - chrono::Duration::milliseconds(500)),
    ]));
    let sessions = FakeSessions::ok(source.clone());
    let (console, out, err) = Console::captured(false);

    let report = run_pipeline(&command(&fake), sessions.clone(), poll_config(), console)
        .await
        .expect("pipeline should succeed");

    assert_eq!(report.stdout_lines, 3);
    assert_eq!(report.stderr_bytes, 0);
    assert_eq!(report.poll.exit, PollExit::StreamEnded);
    assert_eq!(report.poll.signals.first(), Some(&Progress::AwaitingChangesetCreation));
    assert_eq!(report.poll.signals.last(), Some(&Progress::EndOfStream));
    assert!(report.poll.signals.contains(&Progress::StackComplete));
    assert!(report.poll.fetches >= 2, "expected polling plus a final pass");
    assert_eq!(report.poll.events_rendered, 2);

    assert_eq!(sessions.connects(), 1);
    assert_eq!(sessions.options()[0].profile.as_deref(), Some("dev"));
    assert!(source.stacks().iter().all(|s| s == "test-stack"));

    let stdout = out.contents();
    assert!(stdout.contains("Waiting for changeset to be created..\n"));
    assert!(stdout.contains("Successfully created/updated stack\n"));
    // oldest first, each event exactly once
    let bucket = stdout.find("Bucket test-stack-bucket CREATE_COMPLETE").expect("bucket event");
    let stack = stdout
        .find("test-stack test-stack-test-stack UPDATE_COMPLETE")
        .expect("stack event");
    assert!(bucket < stack);
    assert_eq!(stdout.matches("CREATE_COMPLETE").count(), 1);
    assert_eq!(err.contents(), "");
}

#[tokio::test]
async fn events_older_than_lookback_are_not_rendered() {
    let fake = FakeDeploy::new("echo 'Waiting for changeset to be created..'");
    let stale = Utc::now() - chrono::Duration::minutes(10);
    let source = Arc::new(ScriptedEventSource::with_events(vec![raw_event(
        "test-stack",
        "UPDATE_COMPLETE",
        stale,
    )]));
    let (console, out, _) = Console::captured(false);

    let report = run_pipeline(&command(&fake), FakeSessions::ok(source), poll_config(), console)
        .await
        .unwrap();

    assert_eq!(report.poll.exit, PollExit::StreamEnded);
    assert_eq!(
        report.poll.signals,
        vec![Progress::AwaitingChangesetCreation, Progress::EndOfStream]
    );
    assert_eq!(report.poll.events_rendered, 0);
    assert!(!out.contents().contains("UPDATE_COMPLETE"));
}

// ===========================================================================
// Poller short-circuits
// ===========================================================================

#[tokio::test]
async fn no_changeset_skips_session_and_polling() {
    let fake = FakeDeploy::new(
        "echo 'No changes to deploy.'\n\
         echo 'Stack test-stack is up to date'",
    );
    let source = Arc::new(ScriptedEventSource::new());
    let sessions = FakeSessions::ok(source.clone());
    let (console, out, _) = Console::captured(false);

    let report = run_pipeline(&command(&fake), sessions.clone(), poll_config(), console)
        .await
        .expect("no changeset is not an error");

    assert_eq!(report.stdout_lines, 2);
    assert_eq!(report.poll.exit, PollExit::NoChangeset);
    assert_eq!(report.poll.signals, vec![Progress::NoChangeset]);
    assert_eq!(report.poll.fetches, 0);
    assert_eq!(sessions.connects(), 0);
    assert_eq!(source.calls(), 0);
    // lines after the poller left are still echoed
    assert!(out.contents().contains("Stack test-stack is up to date\n"));
}

#[tokio::test]
async fn session_failure_keeps_deploy_output_flowing() {
    let fake = FakeDeploy::new(
        "echo 'Waiting for changeset to be created..'\n\
         echo 'Waiting for stack create/update to complete'\n\
         echo 'Successfully created/updated stack'",
    );
    let sessions = FakeSessions::failing();
    let (console, out, _) = Console::captured(false);

    let report = run_pipeline(&command(&fake), sessions.clone(), poll_config(), console)
        .await
        .expect("session failure is not fatal");

    assert_eq!(report.poll.exit, PollExit::SessionUnavailable);
    assert_eq!(report.poll.fetches, 0);
    assert_eq!(report.stdout_lines, 3);
    assert_eq!(sessions.connects(), 1);
    assert!(out.contents().ends_with("Successfully created/updated stack\n"));
}

#[tokio::test]
async fn fetch_errors_are_counted_and_polling_continues() {
    let fake = FakeDeploy::new(
        "echo 'Waiting for changeset to be created..'\n\
         sleep 0.2\n\
         echo 'Successfully created/updated stack'",
    );
    let now = Utc::now();
    let source = Arc::new(
        ScriptedEventSource::failing("throttled")
            .then(Response::Fail("throttled".to_string()))
            .then(Response::Events(vec![raw_event("test-stack", "UPDATE_COMPLETE", now)])),
    );
    let (console, out, _) = Console::captured(false);

    let report = run_pipeline(&command(&fake), FakeSessions::ok(source), poll_config(), console)
        .await
        .unwrap();

    assert_eq!(report.poll.exit, PollExit::StreamEnded);
    assert_eq!(report.poll.failed_fetches, 2);
    assert!(report.poll.fetches > report.poll.failed_fetches);
    assert_eq!(report.poll.events_rendered, 1);
    assert_eq!(out.contents().matches("UPDATE_COMPLETE").count(), 1);
}

#[tokio::test]
async fn silent_deploy_still_ends_cleanly() {
    let fake = FakeDeploy::new("exit 0");
    let source = Arc::new(ScriptedEventSource::new());
    let sessions = FakeSessions::ok(source.clone());
    let (console, out, _) = Console::captured(false);

    let report = run_pipeline(&command(&fake), sessions.clone(), poll_config(), console)
        .await
        .unwrap();

    assert_eq!(report.stdout_lines, 0);
    assert_eq!(report.poll.signals, vec![Progress::EndOfStream]);
    assert_eq!(report.poll.exit, PollExit::StreamEnded);
    assert_eq!(report.poll.fetches, 1);
    assert_eq!(source.calls(), 1);
    assert_eq!(out.contents(), "");
}

// ===========================================================================
// Streams and failures
// ===========================================================================

#[tokio::test]
async fn stderr_is_relayed_but_never_classified() {
    let fake = FakeDeploy::new(
        "echo 'No changes to deploy.' >&2\n\
         echo 'Waiting for changeset to be created..'",
    );
    let source = Arc::new(ScriptedEventSource::new());
    let sessions = FakeSessions::ok(source);
    let (console, out, err) = Console::captured(false);

    let report = run_pipeline(&command(&fake), sessions.clone(), poll_config(), console)
        .await
        .unwrap();

    assert_eq!(err.contents(), "No changes to deploy.\n");
    assert!(!out.contents().contains("No changes"));
    assert_eq!(report.stderr_bytes, "No changes to deploy.\n".len());
    assert_eq!(report.poll.exit, PollExit::StreamEnded);
    assert!(!report.poll.signals.contains(&Progress::NoChangeset));
    assert_eq!(sessions.connects(), 1);
}

#[tokio::test]
async fn non_utf8_output_is_echoed_and_deploy_runs_to_completion() {
    let fake = FakeDeploy::new(
        "echo 'Waiting for changeset to be created..'\n\
         printf 'Uploading caf\\351 template\\r\\n'\n\
         sleep 0.1\n\
         echo 'Successfully created/updated stack'\n\
         touch \"$(dirname \"$0\")/finished\"",
    );
    let source = Arc::new(ScriptedEventSource::new());
    let (console, out, _) = Console::captured(false);

    let report = run_pipeline(&command(&fake), FakeSessions::ok(source), poll_config(), console)
        .await
        .expect("undecodable output is not a read error");

    assert_eq!(report.stdout_lines, 3);
    assert!(report.poll.signals.contains(&Progress::StackComplete));
    assert_eq!(report.poll.exit, PollExit::StreamEnded);
    assert!(fake.path().with_file_name("finished").exists(), "deploy was cut short");

    let echoed = out.bytes();
    let raw_line: &[u8] = b"Uploading caf\xe9 template\n";
    assert!(
        echoed.windows(raw_line.len()).any(|w| w == raw_line),
        "stdout: {:?}",
        String::from_utf8_lossy(&echoed)
    );
    assert!(out.contents().ends_with("Successfully created/updated stack\n"));
}

#[tokio::test]
async fn nonzero_exit_is_reported_with_code() {
    let fake = FakeDeploy::new(
        "echo 'Waiting for changeset to be created..'\n\
         echo 'An error occurred (ValidationError)' >&2\n\
         exit 255",
    );
    let source = Arc::new(ScriptedEventSource::new());
    let (console, out, err) = Console::captured(false);

    let result = run_pipeline(&command(&fake), FakeSessions::ok(source), poll_config(), console).await;

    match result {
        Err(PipelineError::Exit { code }) => assert_eq!(code, Some(255)),
        other => panic!("expected exit error, got: {other:?}"),
    }
    assert!(out.contents().contains("Waiting for changeset to be created..\n"));
    assert_eq!(err.contents(), "An error occurred (ValidationError)\n");
}

#[tokio::test]
async fn missing_aws_binary_fails_to_spawn() {
    let sessions: Arc<dyn SessionFactory> = FakeSessions::ok(Arc::new(ScriptedEventSource::new()));
    let cmd = DeployCommand::from_request(&request()).with_program("/nonexistent/aws");
    let (console, out, _) = Console::captured(false);

    let err = run_pipeline(&cmd, sessions, poll_config(), console)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Spawn { .. }), "got: {err:?}");
    assert_eq!(out.contents(), "");
}

#[tokio::test]
async fn deploy_receives_full_argument_list() {
    let fake = FakeDeploy::new("echo \"$@\"");
    let request = DeployRequest {
        parameter_overrides: vec!["Env=dev".to_string(), "Size=2".to_string()],
        region: Some("eu-west-1".to_string()),
        ..request()
    };
    let cmd = DeployCommand::from_request(&request).with_program(fake.program());
    let poll = PollConfig::new(
        "test-stack",
        SessionOptions {
            profile: request.profile.clone(),
            region: request.region.clone(),
        },
    )
    .with_interval(Duration::from_millis(10));
    let (console, out, _) = Console::captured(false);

    run_pipeline(&cmd, FakeSessions::failing(), poll, console)
        .await
        .unwrap();

    assert_eq!(
        out.contents(),
        "cloudformation deploy --stack-name test-stack --template-file template.yaml \
         --profile dev --region eu-west-1 --parameter-overrides Env=dev Size=2\n"
    );
}
