//! Compiled pattern tables for output classification.
//!
//! Every state is an independent matcher with a priority; the detector walks
//! the table top to bottom and returns the first hit. Keeping the policy in
//! a table makes it testable and extendable without touching the classifier.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::WorkerState;

/// Ordered (state, matcher) table. First match wins.
pub static STATE_PATTERNS: Lazy<Vec<(WorkerState, Regex)>> = Lazy::new(|| {
    vec![
        (
            WorkerState::WaitingConfirm,
            Regex::new(
                r"(?im)(waiting for confirmation|proceed with this plan\?|^Are you sure|^Do you want to|^Would you like to|^Proceed\?|^Continue\?|\(yes/no\)\s*[?:>]?\s*$|\[yes/no\]\s*[?:>]?\s*$|\(Y/N\)|\(y/n\)|\[Y/n\]|\[y/N\]|❯.*\d+\.\s*(Yes|No)|Select one of the following options:\s*$|Press Enter to continue|Enter a number \(\d+-\d+\):)",
            )
            .expect("waiting-confirm pattern"),
        ),
        (
            WorkerState::Error,
            Regex::new(r"(?i)(error:|failed to|cannot|exception|fatal:)").expect("error pattern"),
        ),
        (
            WorkerState::Working,
            Regex::new(r"<function_calls>|<invoke>").expect("tool-call pattern"),
        ),
        (
            WorkerState::Idle,
            Regex::new(r"(?m)^[❯►>]\s+(Try|Welcome|$)|for shortcuts\s*$").expect("idle pattern"),
        ),
    ]
});

/// Network / temporary failure signatures → retry.
pub const RETRYABLE_SIGNATURES: &[&str] = &[
    "timeout",
    "connection refused",
    "connection reset",
    "network unreachable",
    "temporary failure",
    "try again",
    "rate limit",
    "429",
    "503 service unavailable",
    "504 gateway timeout",
    "econnrefused",
    "econnreset",
    "etimedout",
];

/// Syntax / validation / authorization signatures → do not retry.
pub const NON_RETRYABLE_SIGNATURES: &[&str] = &[
    "syntax error",
    "parse error",
    "invalid syntax",
    "unexpected token",
    "undefined",
    "not defined",
    "cannot find",
    "no such file",
    "permission denied",
    "access denied",
    "401 unauthorized",
    "403 forbidden",
    "404 not found",
    "validation error",
    "invalid argument",
    "type error",
];

/// Signatures requiring human intervention.
pub const FATAL_SIGNATURES: &[&str] = &[
    "panic",
    "fatal error",
    "segmentation fault",
    "out of memory",
    "disk full",
    "no space left",
    "database locked",
    "corruption",
    "critical error",
];

/// Operations blocked unconditionally.
pub const CRITICAL_SIGNATURES: &[&str] = &[
    "rm -rf /",
    "rm -rf ~",
    "rm -rf /etc",
    "rm -rf /var",
    "rm -rf /usr",
    "rm -rf /boot",
    "rm -rf /sys",
    "rm -rf /proc",
    "rm -rf $home",
    "drop database",
    "truncate table users",
    "delete from users",
    "shutdown -h now",
    "reboot -f",
    "mkfs",
    "fdisk",
    "dd if=/dev/zero of=/dev/",
    ":(){ :|:&",
];

/// Destructive operations that are only acceptable away from trunk or
/// production.
pub const HIGH_RISK_SIGNATURES: &[&str] = &[
    "git push --force",
    "git push -f",
    "git reset --hard",
    "drop table",
    "truncate table",
    "delete from",
];

/// Context that escalates a destructive operation to High risk.
pub const PRODUCTION_SIGNATURES: &[&str] = &["production", "main branch", "master branch", "trunk", "live environment"];

/// Context that permits an otherwise High-risk prompt: the work is happening
/// on an isolated or recoverable surface.
pub const SAFETY_MARKERS: &[&str] = &[
    "test branch",
    "development",
    "backup created",
    "rollback available",
    "worktree",
    "feature branch",
    "experimental",
    "sandbox",
];

/// Regex form of the `worker-<id>` / `agent-<id>` safety marker (branch and
/// workspace names the coordinator itself hands out).
pub static WORKER_BRANCH_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(worker|agent)-\d+").expect("worker marker pattern"));

/// Routine mutations that are auto-confirmed.
pub const MEDIUM_RISK_SIGNATURES: &[&str] = &[
    "git commit",
    "git push",
    "npm install",
    "pip install",
    "cargo install",
    "apt install",
    "apt-get install",
    "brew install",
    "chmod",
    "chown",
    "create table",
    "alter table",
    "rm ",
    "remove",
    "delete",
];

/// Read-only or trivially safe prompts.
pub const LOW_RISK_SIGNATURES: &[&str] = &[
    "git status",
    "git log",
    "git diff",
    "ls ",
    "cat ",
    "select ",
    "yes/no",
    "press enter",
];
