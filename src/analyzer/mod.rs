//! Terminal output analysis: state detection, error taxonomy, and the
//! auto-confirmation policy engine.

mod confirm;
mod detector;
mod patterns;

pub use confirm::{ConfirmDecision, ConfirmStats, RiskLevel, assess_risk, confirmation_input};
pub use detector::{Detector, ErrorDetails, ErrorKind, CONTEXT_WINDOW_LINES, STUCK_THRESHOLD};
