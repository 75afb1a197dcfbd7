//! # Notarisation Flow
//!
//! ```text
//! Idle ──→ Dispatched ──→ AwaitingQuorum ──→ Succeeded
//!              ↑                │        ──→ Conflicted
//!              └──── retry ─────┘        ──→ Failed
//! ```
//!
//! Any non-terminal state may also move to `Failed` (cancellation, invalid
//! request). Terminal states never change.

use shared_types::TxId;

use super::error::IllegalTransition;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowState {
    Idle,
    Dispatched,
    AwaitingQuorum,
    Succeeded,
    Conflicted,
    Failed,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowState::Succeeded | FlowState::Conflicted | FlowState::Failed
        )
    }

    pub fn can_transition_to(&self, to: FlowState) -> bool {
        use FlowState::*;
        match (self, to) {
            (Idle, Dispatched) => true,
            (Dispatched, AwaitingQuorum) => true,
            (AwaitingQuorum, Dispatched) => true,
            (AwaitingQuorum, Succeeded) | (AwaitingQuorum, Conflicted) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Progress of one notarisation, kept for diagnostics.
#[derive(Clone, Debug)]
pub struct Flow {
    tx_id: TxId,
    state: FlowState,
    attempts: u32,
    history: Vec<FlowState>,
}

impl Flow {
    pub fn new(tx_id: TxId) -> Self {
        Self {
            tx_id,
            state: FlowState::Idle,
            attempts: 0,
            history: vec![FlowState::Idle],
        }
    }

    pub fn tx_id(&self) -> TxId {
        self.tx_id
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Dispatch rounds started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Every state visited, in order.
    pub fn history(&self) -> &[FlowState] {
        &self.history
    }

    pub fn transition(&mut self, to: FlowState) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(to) {
            return Err(IllegalTransition {
                from: self.state,
                to,
            });
        }
        if to == FlowState::Dispatched {
            self.attempts += 1;
        }
        self.state = to;
        self.history.push(to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut flow = Flow::new(TxId([1; 32]));
        flow.transition(FlowState::Dispatched).unwrap();
        flow.transition(FlowState::AwaitingQuorum).unwrap();
        flow.transition(FlowState::Succeeded).unwrap();
        assert_eq!(flow.attempts(), 1);
        assert!(flow.state().is_terminal());
    }

    #[test]
    fn test_retry_counts_attempts() {
        let mut flow = Flow::new(TxId([1; 32]));
        for _ in 0..3 {
            flow.transition(FlowState::Dispatched).unwrap();
            flow.transition(FlowState::AwaitingQuorum).unwrap();
        }
        flow.transition(FlowState::Failed).unwrap();
        assert_eq!(flow.attempts(), 3);
        assert_eq!(flow.history().len(), 8);
    }

    #[test]
    fn test_illegal_transitions_refused() {
        let mut flow = Flow::new(TxId([1; 32]));
        assert_eq!(
            flow.transition(FlowState::Succeeded),
            Err(IllegalTransition {
                from: FlowState::Idle,
                to: FlowState::Succeeded
            })
        );
        flow.transition(FlowState::Failed).unwrap();
        assert!(flow.transition(FlowState::Dispatched).is_err());
        assert!(flow.transition(FlowState::Failed).is_err());
        assert_eq!(flow.state(), FlowState::Failed);
    }
}
