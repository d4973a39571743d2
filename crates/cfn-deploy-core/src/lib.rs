//! Core of `cfn-deploy`: runs `aws cloudformation deploy` and streams
//! CloudFormation stack events next to the deploy output.
//!
//! ```text
//! deploy stdout --lines--> progress::classify --Progress--> poller
//!      |                                                      |
//!      v                                                      v
//!   Console <------------- render::render_event <---- stackevents::fetch_since
//! ```

pub mod console;
pub mod deploy;
pub mod pipeline;
pub mod progress;
pub mod render;
pub mod stackevents;

pub use console::Console;
pub use deploy::{DeployCommand, DeployRequest};
pub use pipeline::{PipelineError, PipelineReport, PollConfig, PollExit, PollReport, run_pipeline};
pub use progress::Progress;
pub use stackevents::{EventSource, SessionFactory, SessionOptions, StackEvent};
