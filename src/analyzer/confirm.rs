//! Prompt risk classification and auto-confirmation input selection.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::patterns::{
    CRITICAL_SIGNATURES, HIGH_RISK_SIGNATURES, LOW_RISK_SIGNATURES, MEDIUM_RISK_SIGNATURES,
    PRODUCTION_SIGNATURES, SAFETY_MARKERS, WORKER_BRANCH_MARKER,
};

/// Risk level of a confirmation prompt, judged from its surrounding context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// No signal matched; auto-confirmed (permissive default).
    Unknown,
    /// Read-only operations and plain yes/no prompts.
    Low,
    /// Routine mutations: commits, installs, ordinary deletes.
    Medium,
    /// Destructive operation aimed at production/trunk; blocked unless a
    /// safety marker shows the work is isolated or recoverable.
    High,
    /// Unconditionally blocked.
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one confirmation decision.
#[derive(Debug, Clone)]
pub struct ConfirmDecision {
    pub confirm: bool,
    /// Input to inject when confirming. May be empty (bare newline).
    pub input: String,
    pub risk: RiskLevel,
    pub reason: String,
}

/// Observable counters over all confirmation decisions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfirmStats {
    pub total_requests: u64,
    pub auto_confirmed: u64,
    pub blocked: u64,
    pub manual_required: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_confirm_time: Option<DateTime<Utc>>,
}

/// Substring hit that must start at a word boundary, so that `rm ` cannot
/// match inside `confirm ` or `cat ` inside `concat `.
fn signature_hit(haystack: &str, needle: &str) -> bool {
    haystack
        .match_indices(needle)
        .any(|(i, _)| i == 0 || !haystack.as_bytes()[i - 1].is_ascii_alphanumeric())
}

/// Classify the risk of confirming a prompt given its surrounding context.
pub fn assess_risk(context: &str) -> RiskLevel {
    let lower = context.to_lowercase();

    for sig in CRITICAL_SIGNATURES {
        if signature_hit(&lower, sig) {
            return RiskLevel::Critical;
        }
    }

    let destructive = HIGH_RISK_SIGNATURES.iter().any(|s| signature_hit(&lower, s));
    let production = PRODUCTION_SIGNATURES.iter().any(|s| signature_hit(&lower, s));
    if destructive && production {
        return RiskLevel::High;
    }

    if MEDIUM_RISK_SIGNATURES.iter().any(|s| signature_hit(&lower, s)) {
        return RiskLevel::Medium;
    }

    if LOW_RISK_SIGNATURES.iter().any(|s| signature_hit(&lower, s)) {
        return RiskLevel::Low;
    }

    RiskLevel::Unknown
}

/// True when the context carries a marker that makes a High-risk prompt
/// acceptable: the operation targets an isolated or recoverable surface.
pub fn has_safety_marker(context: &str) -> bool {
    let lower = context.to_lowercase();
    SAFETY_MARKERS.iter().any(|m| lower.contains(m)) || WORKER_BRANCH_MARKER.is_match(context)
}

/// Choose the input string matching the prompt's format.
///
/// Detection order: numbered option list, press-enter, `(Y/N)`, `(y/n)`,
/// `[Y/n]`, `[y/N]`, `yes/no`, numeric range, then a default `yes`.
pub fn confirmation_input(context: &str) -> String {
    let lower = context.to_lowercase();

    if context.contains("1. Yes") {
        return "1".to_string();
    }

    if lower.contains("press enter") || lower.contains("hit enter") || lower.contains("enter to continue") {
        // A bare newline
        return String::new();
    }

    if context.contains("(Y/N)") {
        return "Y".to_string();
    }
    if lower.contains("(y/n)") {
        return "y".to_string();
    }
    if context.contains("[Y/n]") {
        return "Y".to_string();
    }
    if context.contains("[y/N]") {
        // The prompt defaults to No; we confirm anyway
        tracing::warn!("Confirming a [y/N] prompt against its default");
        return "y".to_string();
    }

    if lower.contains("yes/no") {
        return "yes".to_string();
    }

    if lower.contains("number (") || lower.contains("(1-") {
        return "1".to_string();
    }

    "yes".to_string()
}

/// Apply the policy table to a risk level.
///
/// Critical blocks outright; High blocks unless a safety marker is present;
/// everything else auto-confirms.
pub fn decide(context: &str) -> ConfirmDecision {
    let risk = assess_risk(context);

    match risk {
        RiskLevel::Critical => ConfirmDecision {
            confirm: false,
            input: String::new(),
            risk,
            reason: "critical operation, blocked".to_string(),
        },
        RiskLevel::High => {
            if has_safety_marker(context) {
                ConfirmDecision {
                    confirm: true,
                    input: confirmation_input(context),
                    risk,
                    reason: "destructive but safety marker present".to_string(),
                }
            } else {
                ConfirmDecision {
                    confirm: false,
                    input: String::new(),
                    risk,
                    reason: "destructive operation against production/trunk, operator required".to_string(),
                }
            }
        }
        RiskLevel::Medium | RiskLevel::Low | RiskLevel::Unknown => ConfirmDecision {
            confirm: true,
            input: confirmation_input(context),
            risk,
            reason: format!("{} risk, auto-confirmed", risk),
        },
    }
}
