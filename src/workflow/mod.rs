//! Workflow state machines.
//!
//! The functions here are pure: they validate transitions against the current
//! entity state, mutate the in-memory entity, and describe the notifications
//! a transition should produce. Persistence and delivery happen in
//! [`crate::commands`].

pub mod checklist;
pub mod defect;

/// Returns true if an optional text field holds something other than whitespace.
pub(crate) fn is_filled(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// Build a guard-violation message: English first, Thai in parentheses.
pub(crate) fn bilingual(english: &str, thai: &str) -> String {
    format!("{} ({})", english, thai)
}
