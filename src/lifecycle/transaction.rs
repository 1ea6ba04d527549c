//! Transaction state (spec.md §4.6): the Coordinator's state machine and
//! rollback stack.

use crate::model::{CompensatingAction, TransactionClock};

/// A named-tunnel transaction's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Init,
    AuthVerified,
    TunnelCreated,
    ConfigWritten,
    DnsReconciled,
    DnsVerified,
    AgentRunning,
    Committed,
    RollingBack,
    RolledBack,
}

/// One `createSession` attempt: current state plus the LIFO rollback stack
/// accumulated so far.
pub struct Transaction {
    pub state: TransactionState,
    pub clock: TransactionClock,
    rollback_stack: Vec<CompensatingAction>,
}

impl Transaction {
    pub fn start() -> Self {
        Self {
            state: TransactionState::Init,
            clock: TransactionClock::start(),
            rollback_stack: Vec::new(),
        }
    }

    pub fn advance(&mut self, state: TransactionState) {
        self.state = state;
    }

    /// Records a compensating action, to be popped and executed in reverse
    /// order if this transaction unwinds.
    pub fn record(&mut self, action: CompensatingAction) {
        self.rollback_stack.push(action);
    }

    /// Drains the rollback stack in LIFO order, consuming it. The caller
    /// executes each action; a drained stack means rollback has completed.
    pub fn drain_rollback(&mut self) -> Vec<CompensatingAction> {
        let mut actions = std::mem::take(&mut self.rollback_stack);
        actions.reverse();
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn rollback_drains_in_lifo_order() {
        let mut tx = Transaction::start();
        tx.record(CompensatingAction::DeleteTunnel { tunnel_id: Uuid::nil() });
        tx.record(CompensatingAction::RemoveConfigFile {
            path: "/tmp/config.yml".into(),
        });
        tx.record(CompensatingAction::TerminateAgent);

        let drained = tx.drain_rollback();
        assert!(matches!(drained[0], CompensatingAction::TerminateAgent));
        assert!(matches!(drained[1], CompensatingAction::RemoveConfigFile { .. }));
        assert!(matches!(drained[2], CompensatingAction::DeleteTunnel { .. }));
    }

    #[test]
    fn drain_empties_the_stack() {
        let mut tx = Transaction::start();
        tx.record(CompensatingAction::TerminateAgent);
        assert_eq!(tx.drain_rollback().len(), 1);
        assert_eq!(tx.drain_rollback().len(), 0);
    }
}
