use influmatch_types::BlockStatus;
use uuid::Uuid;

use crate::error::SendError;

/// Composite gate state. The two blocked flags are normally mutually
/// exclusive but can momentarily both be true; sending is disabled either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Open,
    BlockedByOther,
    HasBlocked,
    BlockedBoth,
}

/// Gates message submission on the block relationship with the open
/// conversation's other participant. Blocked states reject locally, before
/// any network call; only an explicit unblock reopens the gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendGate {
    blocked_by_other: bool,
    has_blocked: bool,
}

impl SendGate {
    pub fn state(&self) -> GateState {
        match (self.blocked_by_other, self.has_blocked) {
            (false, false) => GateState::Open,
            (true, false) => GateState::BlockedByOther,
            (false, true) => GateState::HasBlocked,
            (true, true) => GateState::BlockedBoth,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.blocked_by_other && !self.has_blocked
    }

    /// Sync from a fresh backend query, e.g. when opening a conversation.
    pub fn apply_status(&mut self, status: BlockStatus) {
        self.blocked_by_other = status.blocked;
        self.has_blocked = status.has_blocked;
    }

    /// Sync from a block-change feed event. Edges not touching the
    /// (self, other) pair are ignored.
    pub fn apply_block_event(
        &mut self,
        self_id: Uuid,
        other_id: Uuid,
        blocker_id: Uuid,
        blocked_id: Uuid,
        active: bool,
    ) {
        if blocker_id == other_id && blocked_id == self_id {
            self.blocked_by_other = active;
        } else if blocker_id == self_id && blocked_id == other_id {
            self.has_blocked = active;
        }
    }

    /// The server rejected a send because of a block edge we hadn't seen yet;
    /// fold its verdict into local state.
    pub fn apply_server_rejection(&mut self, by_other: bool) {
        if by_other {
            self.blocked_by_other = true;
        } else {
            self.has_blocked = true;
        }
    }

    /// Validate a message before any network call. Returns the trimmed text,
    /// or an error that carries the text back for the composer.
    pub fn check(&self, text: &str) -> Result<String, SendError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(SendError::Empty);
        }
        if self.blocked_by_other {
            return Err(SendError::Blocked {
                by_other: true,
                text: content.to_string(),
            });
        }
        if self.has_blocked {
            return Err(SendError::Blocked {
                by_other: false,
                text: content.to_string(),
            });
        }
        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_gate_trims_and_passes() {
        let gate = SendGate::default();
        assert_eq!(gate.check("  hello  ").unwrap(), "hello");
        assert!(matches!(gate.check("   "), Err(SendError::Empty)));
    }

    #[test]
    fn blocked_states_reject_locally_and_preserve_text() {
        let mut gate = SendGate::default();
        gate.apply_status(BlockStatus { blocked: true, has_blocked: false });
        assert_eq!(gate.state(), GateState::BlockedByOther);

        match gate.check("hi there") {
            Err(SendError::Blocked { by_other: true, text }) => assert_eq!(text, "hi there"),
            other => panic!("unexpected: {other:?}"),
        }

        gate.apply_status(BlockStatus { blocked: false, has_blocked: true });
        assert!(matches!(
            gate.check("hi"),
            Err(SendError::Blocked { by_other: false, .. })
        ));
    }

    #[test]
    fn both_flags_true_is_representable() {
        let mut gate = SendGate::default();
        gate.apply_status(BlockStatus { blocked: true, has_blocked: true });
        assert_eq!(gate.state(), GateState::BlockedBoth);
        assert!(!gate.is_open());
    }

    #[test]
    fn unblock_event_reopens_the_gate() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut gate = SendGate::default();

        gate.apply_block_event(me, other, other, me, true);
        assert_eq!(gate.state(), GateState::BlockedByOther);

        gate.apply_block_event(me, other, other, me, false);
        assert_eq!(gate.state(), GateState::Open);
        assert!(gate.check("back to normal").is_ok());
    }

    #[test]
    fn unrelated_block_edges_are_ignored() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut gate = SendGate::default();

        gate.apply_block_event(me, other, Uuid::new_v4(), Uuid::new_v4(), true);
        assert!(gate.is_open());
    }

    #[test]
    fn server_rejection_syncs_local_state() {
        let mut gate = SendGate::default();
        gate.apply_server_rejection(true);
        assert_eq!(gate.state(), GateState::BlockedByOther);
    }
}
