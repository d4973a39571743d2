//! Classification of `aws cloudformation deploy` stdout lines.

use std::fmt;

/// Where the deploy command is, judging by the last line it printed.
///
/// Produced by [`classify`] for every stdout line, plus a final
/// [`Progress::EndOfStream`] once stdout closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Progress {
    /// The line is not one of the known progress phrases.
    Unmapped,
    /// The changeset was empty; nothing will be deployed.
    NoChangeset,
    /// `Waiting for changeset to be created..`
    AwaitingChangesetCreation,
    /// `Waiting for stack create/update to complete`
    AwaitingChangesetCompletion,
    /// `Successfully created/updated stack`
    StackComplete,
    /// Deploy stdout has closed. Always the last signal sent.
    EndOfStream,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unmapped => "unmapped",
            Self::NoChangeset => "no_changeset",
            Self::AwaitingChangesetCreation => "awaiting_changeset_creation",
            Self::AwaitingChangesetCompletion => "awaiting_changeset_completion",
            Self::StackComplete => "stack_complete",
            Self::EndOfStream => "end_of_stream",
        };
        f.write_str(s)
    }
}

/// Map one deploy stdout line to its [`Progress`] value.
///
/// Surrounding spaces and periods are ignored, as is case.
pub fn classify(line: &str) -> Progress {
    let normalized = line
        .trim_matches(|c: char| c.is_whitespace() || c == '.')
        .to_lowercase();

    match normalized.as_str() {
        "waiting for changeset to be created" => Progress::AwaitingChangesetCreation,
        "waiting for stack create/update to complete" => Progress::AwaitingChangesetCompletion,
        "no changes to deploy" => Progress::NoChangeset,
        "successfully created/updated stack" => Progress::StackComplete,
        _ => Progress::Unmapped,
    }
}
