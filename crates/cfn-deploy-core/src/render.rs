//! Human-readable rendering of stack events.

use std::fmt::Write as _;
use std::io;

use crossterm::style::Stylize;

use crate::console::Console;
use crate::stackevents::{StackEvent, StatusKind};

const REASON_PAD: &str = "        ";

/// Render one event as a block:
///
/// ```text
/// 12:00:05 Bucket test-stack-bucket-1x2y3z CREATE_COMPLETE
///          Resource creation Initiated
///
/// ```
///
/// The reason line only appears when the event has one. A blank line always
/// closes the block.
pub fn render_event(event: &StackEvent, color: bool) -> String {
    let time = event.timestamp.format("%H:%M:%S").to_string();
    let status = event.resource_status.as_str();

    let mut out = String::new();
    if color {
        let styled_status = match event.status_kind() {
            StatusKind::Ok => status.green().to_string(),
            StatusKind::Failed => status.red().to_string(),
            StatusKind::InProgress => status.blue().to_string(),
            StatusKind::Unknown => status.to_string(),
        };
        let _ = writeln!(
            out,
            "{} {} {} {}",
            time.as_str().dim(),
            event.logical_resource_id.as_str().underlined(),
            event.physical_resource_id,
            styled_status,
        );
        if !event.resource_status_reason.is_empty() {
            let _ = writeln!(
                out,
                "{REASON_PAD} {}",
                event.resource_status_reason.as_str().italic()
            );
        }
    } else {
        let _ = writeln!(
            out,
            "{time} {} {} {status}",
            event.logical_resource_id, event.physical_resource_id,
        );
        if !event.resource_status_reason.is_empty() {
            let _ = writeln!(out, "{REASON_PAD} {}", event.resource_status_reason);
        }
    }
    out.push('\n');
    out
}

/// Render `event` and write it to the console's stdout in one write.
pub fn write_event(console: &Console, event: &StackEvent) -> io::Result<()> {
    console.block(&render_event(event, console.color()))
}
