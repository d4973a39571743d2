//! The deploy pipeline: one deploy subprocess, three workers.
//!
//! ```text
//!                    +--> stdout worker --echo--> Console (stdout)
//!                    |        |
//! deploy subprocess -+        | Progress (mpsc, capacity 1)
//!                    |        v
//!                    |    poller ------render---> Console (stdout)
//!                    |
//!                    +--> stderr worker --tee---> Console (stderr)
//! ```
//!
//! The poller is spawned before the subprocess so it is already waiting
//! when the first line arrives. The stdout worker always sends
//! [`Progress::EndOfStream`] last; that is what ends the poller.

pub mod poller;

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, trace, warn};

use crate::console::Console;
use crate::deploy::{DeployCommand, DeployProcess};
use crate::progress::{Progress, classify};
use crate::stackevents::SessionFactory;

pub use poller::{PollConfig, PollExit, PollReport, Watermark, run_poller};

/// Fatal pipeline failures. Anything not listed here is logged and
/// tolerated.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to capture deploy {stream} pipe")]
    Setup { stream: &'static str },

    #[error("failed to start {program} -- is the aws cli installed and on PATH?")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("deploy {}", describe_exit(.code))]
    Exit { code: Option<i32> },

    #[error("failed waiting for deploy to exit")]
    Wait(#[source] io::Error),

    #[error("failed reading deploy stdout")]
    StdoutRead(#[source] io::Error),

    #[error("pipeline worker failed")]
    Worker(#[from] JoinError),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

/// Summary of a successful pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub stdout_lines: usize,
    pub stderr_bytes: usize,
    pub poll: PollReport,
}

/// Hand a signal to the poller, waiting until it has taken the previous one.
async fn relay(signals: &mpsc::Sender<Progress>, progress: Progress) {
    if signals.send(progress).await.is_err() {
        trace!(%progress, "poller no longer listening");
    }
}

/// Strip a trailing `\n` or `\r\n`.
fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Echo deploy stdout line by line and classify each line for the poller.
///
/// Lines are raw bytes: they are echoed undecoded and classified through a
/// lossy UTF-8 decode, so only real I/O failures end the worker early.
async fn read_stdout(
    stdout: ChildStdout,
    signals: mpsc::Sender<Progress>,
    console: Console,
) -> Result<usize, PipelineError> {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let mut count = 0;

    let result = loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break Ok(count),
            Ok(_) => {
                count += 1;
                let line = trim_line_ending(&buf);
                if let Err(e) = console.line_bytes(line) {
                    warn!(error = %e, "failed to echo deploy output");
                }
                let progress = classify(&String::from_utf8_lossy(line));
                debug!(%progress, "deploy line mapped to progress");
                relay(&signals, progress).await;
            }
            Err(e) => break Err(PipelineError::StdoutRead(e)),
        }
    };

    relay(&signals, Progress::EndOfStream).await;
    debug!(lines = count, "stdout handler finished");
    result
}

/// Copy deploy stderr to the console as it arrives.
async fn drain_stderr(mut stderr: ChildStderr, console: Console) -> usize {
    let mut buf = vec![0u8; 8 * 1024];
    let mut total = 0;

    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                if let Err(e) = console.err_bytes(&buf[..n]) {
                    warn!(error = %e, "failed to echo deploy stderr");
                }
            }
            Err(e) => {
                warn!(error = %e, "error reading deploy stderr");
                break;
            }
        }
    }

    debug!(bytes = total, "stderr handler finished");
    total
}

/// Run `command` to completion while polling stack events.
///
/// Returns once the subprocess has exited and all three workers have
/// finished. A non-zero exit is [`PipelineError::Exit`]; its stderr is
/// still fully echoed first, but the poller is abandoned.
pub async fn run_pipeline(
    command: &DeployCommand,
    sessions: Arc<dyn SessionFactory>,
    poll: PollConfig,
    console: Console,
) -> Result<PipelineReport, PipelineError> {
    debug!(program = command.program(), args = %command, "running deploy");

    let (signal_tx, signal_rx) = mpsc::channel::<Progress>(1);
    let poller = tokio::spawn(run_poller(signal_rx, sessions, poll, console.clone()));

    let DeployProcess {
        mut child,
        stdout,
        stderr,
    } = match command.spawn().await {
        Ok(process) => process,
        Err(e) => {
            poller.abort();
            return Err(e);
        }
    };

    let stdout_worker = tokio::spawn(read_stdout(stdout, signal_tx, console.clone()));
    let stderr_worker = tokio::spawn(drain_stderr(stderr, console));

    let stdout_result = match stdout_worker.await {
        Ok(result) => result,
        Err(e) => Err(PipelineError::Worker(e)),
    };
    let stdout_lines = match stdout_result {
        Ok(lines) => lines,
        Err(e) => {
            let _ = child.kill().await;
            poller.abort();
            stderr_worker.abort();
            return Err(e);
        }
    };

    let status = match child.wait().await {
        Ok(status) => status,
        Err(e) => {
            poller.abort();
            stderr_worker.abort();
            return Err(PipelineError::Wait(e));
        }
    };

    if !status.success() {
        poller.abort();
        let _ = stderr_worker.await;
        return Err(PipelineError::Exit {
            code: status.code(),
        });
    }

    let stderr_bytes = stderr_worker.await?;
    let poll = poller.await?;

    Ok(PipelineReport {
        stdout_lines,
        stderr_bytes,
        poll,
    })
}
