//! The stack event poller: waits for the deploy to make progress, then
//! fetches and renders events until deploy stdout closes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::console::Console;
use crate::deploy::DeployRequest;
use crate::progress::Progress;
use crate::render::write_event;
use crate::stackevents::{EventSource, SessionFactory, SessionOptions, StackEvent, fetch_since};

/// How the poller finds and paces stack event queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    pub stack_name: String,
    pub session: SessionOptions,
    /// Sleep between fetches.
    pub interval: Duration,
    /// How far before now the first poll starts looking for events.
    pub lookback: Duration,
}

impl PollConfig {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);
    pub const DEFAULT_LOOKBACK: Duration = Duration::from_secs(5);

    pub fn new(stack_name: impl Into<String>, session: SessionOptions) -> Self {
        Self {
            stack_name: stack_name.into(),
            session,
            interval: Self::DEFAULT_INTERVAL,
            lookback: Self::DEFAULT_LOOKBACK,
        }
    }

    /// Poll the stack being deployed, with the same profile and region.
    pub fn for_request(request: &DeployRequest) -> Self {
        Self::new(
            request.stack_name.clone(),
            SessionOptions {
                profile: request.profile.clone(),
                region: request.region.clone(),
            },
        )
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }
}

/// Timestamp at or below which events count as already shown.
///
/// Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    pub fn starting_at(now: DateTime<Utc>, lookback: Duration) -> Self {
        let lookback = chrono::Duration::from_std(lookback).unwrap_or(chrono::Duration::zero());
        Self(now - lookback)
    }

    pub fn get(self) -> DateTime<Utc> {
        self.0
    }

    /// Move up to the newest of `events`, never backward.
    pub fn advance(self, events: &[StackEvent]) -> Self {
        events
            .iter()
            .map(|e| e.timestamp)
            .max()
            .map_or(self, |newest| Self(self.0.max(newest)))
    }
}

/// How the poller stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    /// The first signal said there was nothing to deploy.
    NoChangeset,
    /// No event-query session could be established.
    SessionUnavailable,
    /// Deploy stdout closed and the final pass ran.
    StreamEnded,
}

/// What the poller did during one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub exit: PollExit,
    /// Signals received, in order.
    pub signals: Vec<Progress>,
    /// Fetch attempts, including the final pass.
    pub fetches: usize,
    pub failed_fetches: usize,
    pub events_rendered: usize,
}

impl PollReport {
    fn new() -> Self {
        Self {
            exit: PollExit::StreamEnded,
            signals: Vec::new(),
            fetches: 0,
            failed_fetches: 0,
            events_rendered: 0,
        }
    }

    fn finish(mut self, exit: PollExit) -> Self {
        self.exit = exit;
        self
    }
}

/// One fetch/render pass. Returns the advanced watermark.
async fn poll_once(
    source: &dyn EventSource,
    stack_name: &str,
    watermark: Watermark,
    console: &Console,
    report: &mut PollReport,
) -> Watermark {
    report.fetches += 1;

    let events = match fetch_since(source, watermark.get(), stack_name).await {
        Ok(events) => events,
        Err(e) => {
            report.failed_fetches += 1;
            warn!(stack = stack_name, error = %e, "error describing stack events");
            return watermark;
        }
    };

    for event in &events {
        if let Err(e) = write_event(console, event) {
            warn!(error = %e, "failed to write stack event");
        }
    }
    report.events_rendered += events.len();

    watermark.advance(&events)
}

/// Run the poller until the deploy is done.
///
/// Blocks on the first signal. [`Progress::NoChangeset`] ends the poller at
/// once without a session or a fetch. Otherwise a session is established and
/// events are fetched every `config.interval` until
/// [`Progress::EndOfStream`] (or a closed channel), after which exactly one
/// final pass runs.
pub async fn run_poller(
    mut signals: mpsc::Receiver<Progress>,
    sessions: Arc<dyn SessionFactory>,
    config: PollConfig,
    console: Console,
) -> PollReport {
    let mut report = PollReport::new();

    let first = signals.recv().await.unwrap_or(Progress::EndOfStream);
    report.signals.push(first);
    if first == Progress::NoChangeset {
        debug!("no changeset, skipping stack events");
        return report.finish(PollExit::NoChangeset);
    }

    let source = match sessions.connect(&config.session).await {
        Ok(source) => source,
        Err(e) => {
            warn!(error = %e, "could not create aws session, stack events unavailable");
            return report.finish(PollExit::SessionUnavailable);
        }
    };

    info!(stack = %config.stack_name, "polling stack events");
    let mut watermark = Watermark::starting_at(Utc::now(), config.lookback);
    let mut ended = first == Progress::EndOfStream;

    while !ended {
        match signals.try_recv() {
            Ok(Progress::EndOfStream) => {
                report.signals.push(Progress::EndOfStream);
                ended = true;
            }
            Ok(signal) => {
                debug!(%signal, "progress signal");
                report.signals.push(signal);
            }
            Err(TryRecvError::Disconnected) => ended = true,
            Err(TryRecvError::Empty) => {
                watermark =
                    poll_once(source.as_ref(), &config.stack_name, watermark, &console, &mut report)
                        .await;
                tokio::time::sleep(config.interval).await;
            }
        }
    }

    poll_once(source.as_ref(), &config.stack_name, watermark, &console, &mut report).await;
    debug!(fetches = report.fetches, events = report.events_rendered, "poller finished");
    report.finish(PollExit::StreamEnded)
}
