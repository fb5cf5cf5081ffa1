//! Element instance lifecycle as an explicit transition table.

use crate::record::ProcessInstanceIntent;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElementState {
    Activating,
    Activated,
    Completing,
    Completed,
    Terminating,
    Terminated,
}

impl ElementState {
    pub fn as_str(self) -> &'static str {
        match self {
            ElementState::Activating => "ELEMENT_ACTIVATING",
            ElementState::Activated => "ELEMENT_ACTIVATED",
            ElementState::Completing => "ELEMENT_COMPLETING",
            ElementState::Completed => "ELEMENT_COMPLETED",
            ElementState::Terminating => "ELEMENT_TERMINATING",
            ElementState::Terminated => "ELEMENT_TERMINATED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ElementState::Completed | ElementState::Terminated)
    }

    /// Active for the purpose of modification, migration and counting children.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for ElementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side effects the behavior layer performs right after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEffect {
    SubscribeBoundaryEvents,
    UnsubscribeEvents,
    CancelJob,
    ResolveIncidents,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Expected to take transition to '{to}' but element instance is in state '{from}'.")]
pub struct LifecycleError {
    pub from: String,
    pub to: String,
}

const NONE: &[LifecycleEffect] = &[];
const ON_ACTIVATED: &[LifecycleEffect] = &[LifecycleEffect::SubscribeBoundaryEvents];
const ON_COMPLETING: &[LifecycleEffect] = &[LifecycleEffect::UnsubscribeEvents];
const ON_TERMINATING: &[LifecycleEffect] = &[
    LifecycleEffect::UnsubscribeEvents,
    LifecycleEffect::CancelJob,
    LifecycleEffect::ResolveIncidents,
];

/// `from == None` means the element instance does not exist yet.
pub fn next_state(
    from: Option<ElementState>,
    intent: ProcessInstanceIntent,
) -> Result<(ElementState, &'static [LifecycleEffect]), LifecycleError> {
    use ElementState::*;
    use ProcessInstanceIntent as I;

    let next = match (from, intent) {
        (None, I::ElementActivating) => Some((Activating, NONE)),
        (Some(Activating), I::ElementActivated) => Some((Activated, ON_ACTIVATED)),
        (Some(Activated), I::ElementCompleting) => Some((Completing, ON_COMPLETING)),
        (Some(Completing), I::ElementCompleted) => Some((Completed, NONE)),
        (Some(Activating | Activated | Completing), I::ElementTerminating) => {
            Some((Terminating, ON_TERMINATING))
        }
        (Some(Terminating), I::ElementTerminated) => Some((Terminated, NONE)),
        _ => None,
    };

    next.ok_or_else(|| LifecycleError {
        from: from.map(|s| s.as_str()).unwrap_or("NONE").to_string(),
        to: intent.as_str().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProcessInstanceIntent as I;

    #[test]
    fn happy_path() {
        let (s, _) = next_state(None, I::ElementActivating).unwrap();
        let (s, effects) = next_state(Some(s), I::ElementActivated).unwrap();
        assert_eq!(effects, ON_ACTIVATED);
        let (s, effects) = next_state(Some(s), I::ElementCompleting).unwrap();
        assert_eq!(effects, &[LifecycleEffect::UnsubscribeEvents]);
        let (s, _) = next_state(Some(s), I::ElementCompleted).unwrap();
        assert!(s.is_terminal());
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for intent in [I::ElementActivated, I::ElementCompleting, I::ElementTerminating] {
            assert!(next_state(Some(ElementState::Completed), intent).is_err());
            assert!(next_state(Some(ElementState::Terminated), intent).is_err());
        }
    }

    #[test]
    fn termination_cancels_work() {
        let (s, effects) = next_state(Some(ElementState::Activated), I::ElementTerminating).unwrap();
        assert_eq!(s, ElementState::Terminating);
        assert!(effects.contains(&LifecycleEffect::CancelJob));
        assert!(effects.contains(&LifecycleEffect::ResolveIncidents));
    }

    #[test]
    fn error_text() {
        let err = next_state(Some(ElementState::Completed), I::ElementActivated).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expected to take transition to 'ELEMENT_ACTIVATED' but element instance is in state 'ELEMENT_COMPLETED'."
        );
    }
}
