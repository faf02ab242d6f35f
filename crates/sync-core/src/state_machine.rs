use crate::{
    error::SyncError,
    types::{SessionCommand, SessionPhase},
};

/// Session lifecycle machine: `Idle -> Loading -> Ready -> Closed`.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    phase: SessionPhase,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
        }
    }
}

impl SessionStateMachine {
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Validate a command against the current phase, transitioning when the
    /// command implies one. Returns the new phase when it changed.
    pub fn apply(&mut self, command: &SessionCommand) -> Result<Option<SessionPhase>, SyncError> {
        use SessionCommand::*;

        match command {
            Open { .. } => self.transition_from(
                &[SessionPhase::Idle],
                SessionPhase::Loading,
                "open",
            ),
            Retarget { .. } => self.transition_from(
                &[SessionPhase::Idle, SessionPhase::Loading, SessionPhase::Ready],
                SessionPhase::Loading,
                "retarget",
            ),
            Close => Ok(self.close()),
            LoadMore => self
                .require(&[SessionPhase::Ready], "load_more")
                .map(|()| None),
            MarkRead { .. } | Remove { .. } | RemoveAll => self
                .require(&[SessionPhase::Ready], "counter command")
                .map(|()| None),
            Input { .. } => self
                .require(
                    &[SessionPhase::Idle, SessionPhase::Loading, SessionPhase::Ready],
                    "input",
                )
                .map(|()| None),
        }
    }

    /// First resolved snapshot (or an absorbed empty result) settles a
    /// loading session into `Ready`.
    pub fn on_snapshot_ready(&mut self) -> Option<SessionPhase> {
        if self.phase == SessionPhase::Loading {
            self.phase = SessionPhase::Ready;
            Some(SessionPhase::Ready)
        } else {
            None
        }
    }

    /// Terminal transition; idempotent.
    pub fn close(&mut self) -> Option<SessionPhase> {
        if self.phase == SessionPhase::Closed {
            None
        } else {
            self.phase = SessionPhase::Closed;
            Some(SessionPhase::Closed)
        }
    }

    fn transition_from(
        &mut self,
        expected: &[SessionPhase],
        next: SessionPhase,
        action: &str,
    ) -> Result<Option<SessionPhase>, SyncError> {
        if !expected.contains(&self.phase) {
            return Err(SyncError::invalid_transition(self.phase, action));
        }
        self.phase = next;
        Ok(Some(next))
    }

    fn require(&self, expected: &[SessionPhase], action: &str) -> Result<(), SyncError> {
        if expected.contains(&self.phase) {
            Ok(())
        } else {
            Err(SyncError::invalid_transition(self.phase, action))
        }
    }
}
