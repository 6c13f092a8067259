use campaign_core::types::CampaignStatus;
use campaign_core::{CampaignError, CampaignResult};

/// Describes a single valid campaign status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: CampaignStatus,
    pub to: CampaignStatus,
    pub trigger: &'static str,
}

/// Guards the campaign lifecycle by enforcing a finite set of valid
/// status transitions. Stateless: it judges the status read from the
/// store, and the store's guarded write makes the move.
#[derive(Debug, Clone)]
pub struct CampaignLifecycle {
    transitions: Vec<StateTransition>,
}

impl CampaignLifecycle {
    pub fn new() -> Self {
        use CampaignStatus::*;

        let transitions = vec![
            // Draft ->
            StateTransition { from: Draft, to: Scheduled, trigger: "schedule" },
            StateTransition { from: Draft, to: Sending, trigger: "dispatch" },
            StateTransition { from: Draft, to: Cancelled, trigger: "cancel" },
            // Scheduled ->
            StateTransition { from: Scheduled, to: Sending, trigger: "dispatch" },
            StateTransition { from: Scheduled, to: Cancelled, trigger: "cancel" },
            // Sending ->
            StateTransition { from: Sending, to: Completed, trigger: "drained" },
            StateTransition { from: Sending, to: Failed, trigger: "engine_failure" },
            StateTransition { from: Sending, to: Cancelled, trigger: "cancel" },
            // Failed -> (resume only touches pending recipients)
            StateTransition { from: Failed, to: Sending, trigger: "resume" },
        ];

        Self { transitions }
    }

    /// Returns `true` if the given transition is allowed.
    pub fn can_transition(&self, from: CampaignStatus, to: CampaignStatus) -> bool {
        self.transitions.iter().any(|t| t.from == from && t.to == to)
    }

    pub fn check(&self, from: CampaignStatus, to: CampaignStatus) -> CampaignResult<()> {
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(CampaignError::InvalidTransition { from, to })
        }
    }

    pub fn trigger(&self, from: CampaignStatus, to: CampaignStatus) -> Option<&'static str> {
        self.transitions
            .iter()
            .find(|t| t.from == from && t.to == to)
            .map(|t| t.trigger)
    }

    /// No transition leaves these states.
    pub fn is_terminal(&self, status: CampaignStatus) -> bool {
        !self.transitions.iter().any(|t| t.from == status)
    }
}

impl Default for CampaignLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CampaignStatus::*;

    #[test]
    fn test_valid_paths() {
        let lifecycle = CampaignLifecycle::new();
        assert!(lifecycle.can_transition(Draft, Scheduled));
        assert!(lifecycle.can_transition(Scheduled, Sending));
        assert!(lifecycle.can_transition(Sending, Completed));
        assert!(lifecycle.can_transition(Sending, Cancelled));
        assert!(lifecycle.can_transition(Failed, Sending));
        assert_eq!(lifecycle.trigger(Failed, Sending), Some("resume"));
    }

    #[test]
    fn test_invalid_paths() {
        let lifecycle = CampaignLifecycle::new();
        assert!(!lifecycle.can_transition(Scheduled, Scheduled));
        assert!(!lifecycle.can_transition(Completed, Sending));
        assert!(!lifecycle.can_transition(Cancelled, Sending));
        assert!(!lifecycle.can_transition(Failed, Cancelled));
        assert!(!lifecycle.can_transition(Draft, Completed));
        assert!(matches!(
            lifecycle.check(Completed, Cancelled),
            Err(CampaignError::InvalidTransition {
                from: Completed,
                to: Cancelled
            })
        ));
    }

    #[test]
    fn test_terminal_states() {
        let lifecycle = CampaignLifecycle::new();
        assert!(lifecycle.is_terminal(Completed));
        assert!(lifecycle.is_terminal(Cancelled));
        assert!(!lifecycle.is_terminal(Failed));
        assert!(!lifecycle.is_terminal(Sending));
    }
}
