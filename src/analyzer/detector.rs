//! Rolling-window state detection and error classification.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::domain::WorkerState;

use super::confirm::{self, ConfirmDecision, ConfirmStats, RiskLevel};
use super::patterns::{
    FATAL_SIGNATURES, NON_RETRYABLE_SIGNATURES, RETRYABLE_SIGNATURES, STATE_PATTERNS,
};

/// Lines retained in the rolling scrollback window.
pub const CONTEXT_WINDOW_LINES: usize = 200;

/// Lines of recent context inspected per classification.
const RECENT_LINES: usize = 50;

/// Silence longer than this marks the worker stuck.
pub const STUCK_THRESHOLD: Duration = Duration::from_secs(60);

/// A confirmation prompt unanswered for this long is a timeout signal.
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Error classification feeding the retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or temporary failure; retry with backoff.
    Retryable,
    /// Syntax/validation/authorization failure; retrying cannot help.
    NonRetryable,
    /// Requires human intervention.
    Fatal,
    /// Matched only the bare word `error`/`failed`; retried at most twice.
    Unknown,
}

/// Classified error with its surrounding context.
#[derive(Debug, Clone)]
pub struct ErrorDetails {
    pub kind: ErrorKind,
    pub message: String,
    pub context: String,
}

/// Classifies a worker's streaming output into a semantic state.
///
/// Appended output accumulates in a bounded deque; classification inspects
/// the most recent lines so that a long scrollback cannot mask the current
/// prompt.
pub struct Detector {
    window: VecDeque<String>,
    last_output: Instant,
    waiting_since: Option<Instant>,
    confirm_stats: ConfirmStats,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(CONTEXT_WINDOW_LINES),
            last_output: Instant::now(),
            waiting_since: None,
            confirm_stats: ConfirmStats::default(),
        }
    }

    /// Decide whether the pending confirmation prompt should be answered,
    /// and with what input. Counters are updated on every call.
    ///
    /// Risk is judged over a wider context (100 lines) than the input format
    /// (50 lines): the dangerous command often scrolled past before the
    /// prompt itself appeared.
    pub fn should_confirm(&mut self) -> ConfirmDecision {
        let risk_context = self.recent_output(100);
        let decision = confirm::decide(&risk_context);

        self.confirm_stats.total_requests += 1;
        if decision.confirm {
            self.confirm_stats.auto_confirmed += 1;
            self.confirm_stats.last_confirm_time = Some(chrono::Utc::now());
        } else if decision.risk == RiskLevel::High {
            // Blocked but resolvable by the operator
            self.confirm_stats.manual_required += 1;
        } else {
            self.confirm_stats.blocked += 1;
        }

        decision
    }

    /// Snapshot of the confirmation counters.
    pub fn confirm_stats(&self) -> ConfirmStats {
        self.confirm_stats.clone()
    }

    pub fn reset_confirm_stats(&mut self) {
        self.confirm_stats = ConfirmStats::default();
    }

    /// Append new output and classify the current state.
    ///
    /// Empty input returns Idle until the stuck threshold elapses.
    pub fn analyze(&mut self, output: &str) -> WorkerState {
        if output.is_empty() {
            if self.last_output.elapsed() > STUCK_THRESHOLD {
                return WorkerState::Stuck;
            }
            return WorkerState::Idle;
        }

        self.last_output = Instant::now();

        for line in output.split('\n') {
            if self.window.len() == CONTEXT_WINDOW_LINES {
                self.window.pop_front();
            }
            self.window.push_back(line.to_string());
        }

        let recent = self.recent_output(RECENT_LINES);

        for (state, pattern) in STATE_PATTERNS.iter() {
            if pattern.is_match(&recent) {
                if *state == WorkerState::WaitingConfirm {
                    self.waiting_since.get_or_insert_with(Instant::now);
                } else {
                    self.waiting_since = None;
                }
                return *state;
            }
        }

        self.waiting_since = None;
        // Non-empty output with no other signal means the assistant is busy
        WorkerState::Working
    }

    /// Last `n` lines of the window joined with newlines.
    pub fn recent_output(&self, n: usize) -> String {
        let skip = self.window.len().saturating_sub(n);
        self.window
            .iter()
            .skip(skip)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Entire retained window.
    pub fn context(&self) -> String {
        self.recent_output(self.window.len())
    }

    /// True when a confirmation prompt has been pending beyond the timeout.
    pub fn confirm_timed_out(&self) -> bool {
        self.waiting_since
            .map(|t| t.elapsed() > CONFIRM_TIMEOUT)
            .unwrap_or(false)
    }

    /// How long the current confirmation prompt has been waiting.
    pub fn confirm_wait(&self) -> Duration {
        self.waiting_since.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Drop all retained output and timers.
    pub fn reset(&mut self) {
        self.window.clear();
        self.last_output = Instant::now();
        self.waiting_since = None;
    }

    /// Classify a captured output region into the error taxonomy.
    ///
    /// Independent of the state machine: callers hand in whatever region
    /// they captured (often `recent_output(50)`).
    pub fn classify_error(&self, output: &str) -> ErrorDetails {
        let lower = output.to_lowercase();

        for sig in RETRYABLE_SIGNATURES {
            if lower.contains(sig) {
                return ErrorDetails {
                    kind: ErrorKind::Retryable,
                    message: format!("network or temporary failure ({})", sig),
                    context: output.to_string(),
                };
            }
        }

        for sig in NON_RETRYABLE_SIGNATURES {
            if lower.contains(sig) {
                return ErrorDetails {
                    kind: ErrorKind::NonRetryable,
                    message: format!("syntax or validation failure ({})", sig),
                    context: output.to_string(),
                };
            }
        }

        for sig in FATAL_SIGNATURES {
            if lower.contains(sig) {
                return ErrorDetails {
                    kind: ErrorKind::Fatal,
                    message: format!("fatal condition ({})", sig),
                    context: output.to_string(),
                };
            }
        }

        // Bare `error`/`failed` with no recognizable signature stays Unknown;
        // the retry table caps Unknown at two attempts.
        let message = if lower.contains("error") || lower.contains("failed") {
            "unclassified error".to_string()
        } else {
            "no error signature".to_string()
        };

        ErrorDetails {
            kind: ErrorKind::Unknown,
            message,
            context: output.to_string(),
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_last_output(&mut self, by: Duration) {
        self.last_output = Instant::now() - by;
    }

    #[cfg(test)]
    pub(crate) fn backdate_waiting_since(&mut self, by: Duration) {
        self.waiting_since = Some(Instant::now() - by);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waiting_confirm_detection() {
        for output in [
            "Do you want to proceed? (yes/no)",
            "Continue with this plan? (Y/N)",
            "Press Enter to continue",
            "❯ 1. Yes\n  2. No",
            "Proceed with this plan?",
        ] {
            let mut d = Detector::new();
            assert_eq!(d.analyze(output), WorkerState::WaitingConfirm, "output: {}", output);
            assert!(d.waiting_since.is_some());
        }
    }

    #[test]
    fn test_error_detection() {
        for output in [
            "error: file not found",
            "failed to connect to server",
            "cannot read file",
            "exception occurred",
            "fatal: repository not found",
        ] {
            let mut d = Detector::new();
            assert_eq!(d.analyze(output), WorkerState::Error, "output: {}", output);
        }
    }

    #[test]
    fn test_idle_detection() {
        for output in ["❯ Try asking me anything", "❯ Welcome back", "? for shortcuts"] {
            let mut d = Detector::new();
            assert_eq!(d.analyze(output), WorkerState::Idle, "output: {}", output);
        }
    }

    #[test]
    fn test_working_is_default_for_output() {
        let mut d = Detector::new();
        assert_eq!(d.analyze("Refactoring the parser module"), WorkerState::Working);
        assert_eq!(d.analyze("<invoke>read_file</invoke>"), WorkerState::Working);
    }

    #[test]
    fn test_empty_input_idle_then_stuck() {
        let mut d = Detector::new();
        assert_eq!(d.analyze(""), WorkerState::Idle);

        d.backdate_last_output(STUCK_THRESHOLD + Duration::from_secs(1));
        assert_eq!(d.analyze(""), WorkerState::Stuck);
    }

    #[test]
    fn test_waiting_since_cleared_on_transition_out() {
        let mut d = Detector::new();
        d.analyze("Continue? (yes/no)");
        assert!(d.waiting_since.is_some());

        d.analyze("Continuing with the task now");
        assert!(d.waiting_since.is_none());
    }

    #[test]
    fn test_confirm_timeout() {
        let mut d = Detector::new();
        assert!(!d.confirm_timed_out());

        d.analyze("Continue? (yes/no)");
        assert!(!d.confirm_timed_out());

        d.backdate_waiting_since(Duration::from_secs(6 * 60));
        assert!(d.confirm_timed_out());
        assert!(d.confirm_wait() >= Duration::from_secs(6 * 60));
    }

    #[test]
    fn test_window_bounded() {
        let mut d = Detector::new();
        d.analyze("FIRST_MARKER");
        for i in 0..CONTEXT_WINDOW_LINES + 10 {
            d.analyze(&format!("line {}", i));
        }
        assert_eq!(d.window.len(), CONTEXT_WINDOW_LINES);
        assert!(!d.context().contains("FIRST_MARKER"));
    }

    #[test]
    fn test_recent_output() {
        let mut d = Detector::new();
        for i in 1..=5 {
            d.analyze(&format!("Line {}", i));
        }
        assert_eq!(d.recent_output(3), "Line 3\nLine 4\nLine 5");
        assert!(d.recent_output(100).contains("Line 1"));
        assert_eq!(d.recent_output(0), "");
    }

    #[test]
    fn test_reset() {
        let mut d = Detector::new();
        d.analyze("Continue? (yes/no)");
        d.reset();
        assert!(d.context().is_empty());
        assert!(d.waiting_since.is_none());
    }

    #[test]
    fn test_error_classification() {
        let d = Detector::new();
        let cases = [
            ("error: connection timeout", ErrorKind::Retryable),
            ("network unreachable", ErrorKind::Retryable),
            ("rate limit exceeded, try again", ErrorKind::Retryable),
            ("503 Service Unavailable", ErrorKind::Retryable),
            ("ETIMEDOUT while fetching", ErrorKind::Retryable),
            ("syntax error: unexpected token", ErrorKind::NonRetryable),
            ("404 not found", ErrorKind::NonRetryable),
            ("permission denied", ErrorKind::NonRetryable),
            ("panic: runtime error", ErrorKind::Fatal),
            ("fatal error: out of memory", ErrorKind::Fatal),
            ("no space left on device", ErrorKind::Fatal),
            ("error: something odd happened", ErrorKind::Unknown),
            ("the build failed mysteriously", ErrorKind::Unknown),
        ];

        for (output, expected) in cases {
            let details = d.classify_error(output);
            assert_eq!(details.kind, expected, "output: {}", output);
            assert_eq!(details.context, output);
            assert!(!details.message.is_empty());
        }
    }

    #[test]
    fn test_should_confirm_updates_stats() {
        let mut d = Detector::new();
        d.analyze("Delete build artifacts? (y/n)");
        let decision = d.should_confirm();
        assert!(decision.confirm);
        assert_eq!(decision.input, "y");

        d.reset();
        d.analyze("Drop database production? (yes/no)");
        let decision = d.should_confirm();
        assert!(!decision.confirm);

        d.reset();
        d.analyze("git push --force to main branch? [Y/n]");
        let decision = d.should_confirm();
        assert!(!decision.confirm);

        let stats = d.confirm_stats();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.auto_confirmed, 1);
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.manual_required, 1);
        assert!(stats.last_confirm_time.is_some());

        d.reset_confirm_stats();
        assert_eq!(d.confirm_stats().total_requests, 0);
    }

    #[test]
    fn test_multiline_analysis() {
        let mut d = Detector::new();
        let output = "Running analysis...\nProcessing files...\nFound 5 issues\n\nDo you want to proceed with fixes? (yes/no)\n";
        assert_eq!(d.analyze(output), WorkerState::WaitingConfirm);
        assert!(d.context().contains("Running analysis"));
    }
}
