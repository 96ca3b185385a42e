//! Text summary builder for CLI output.
//!
//! Formats the human-readable lines printed after a headless run.

use crate::model::ExitOutcome;
use std::time::Duration;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Round to milliseconds so humantime does not print nanoseconds.
pub(crate) fn format_elapsed(d: Duration) -> String {
    let millis = Duration::from_millis(d.as_millis() as u64);
    humantime::format_duration(millis).to_string()
}

fn format_bytes(n: usize) -> String {
    if n >= 1024 * 1024 {
        format!("{:.1} MiB", n as f64 / (1024.0 * 1024.0))
    } else if n >= 1024 {
        format!("{:.1} KiB", n as f64 / 1024.0)
    } else {
        format!("{n} B")
    }
}

/// Build the end-of-run summary.
///
/// `elapsed` is the process lifetime reported by the controller, `wall` the time the
/// headless run took end to end.
pub(crate) fn build_text_summary(
    outcome: &ExitOutcome,
    elapsed: Duration,
    wall: Duration,
    stdout_bytes: usize,
    stderr_bytes: usize,
) -> TextSummary {
    let mut lines = Vec::new();
    lines.push(format!("== Finished: {} ==", outcome.to_message()));
    if !matches!(outcome, ExitOutcome::LaunchFailed { .. }) {
        lines.push(format!(
            "Run time: {} (wall {})",
            format_elapsed(elapsed),
            format_elapsed(wall)
        ));
        lines.push(format!(
            "Output: stdout {}, stderr {}",
            format_bytes(stdout_bytes),
            format_bytes(stderr_bytes)
        ));
    }
    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reports_exit_and_output_sizes() {
        let s = build_text_summary(
            &ExitOutcome::Exited { code: Some(0) },
            Duration::from_millis(1_500),
            Duration::from_millis(1_620),
            2048,
            10,
        );
        assert_eq!(s.lines[0], "== Finished: exit code 0 ==");
        assert_eq!(s.lines[1], "Run time: 1s 500ms (wall 1s 620ms)");
        assert_eq!(s.lines[2], "Output: stdout 2.0 KiB, stderr 10 B");
    }

    #[test]
    fn launch_failure_has_no_timing_lines() {
        let s = build_text_summary(
            &ExitOutcome::LaunchFailed {
                error: "No such file or directory (os error 2)".into(),
            },
            Duration::ZERO,
            Duration::ZERO,
            0,
            0,
        );
        assert_eq!(s.lines.len(), 1);
        assert!(s.lines[0].contains("failed to launch"));
    }

    #[test]
    fn elapsed_drops_sub_millisecond_noise() {
        assert_eq!(format_elapsed(Duration::from_nanos(2_000_123_456)), "2s");
    }
}
