use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{SessionCommand, SessionState};

/// Broadcast stream of published session states.
pub type StateStream = broadcast::Receiver<SessionState>;

/// Errors returned by session channel operations.
#[derive(Debug, Error)]
pub enum SessionChannelError {
    /// The session runtime has gone away.
    #[error("session command channel is closed")]
    CommandChannelClosed,
}

/// Command/state channel pair owned by the session runtime and its handle.
#[derive(Clone, Debug)]
pub struct SessionChannels {
    command_tx: mpsc::Sender<SessionCommand>,
    state_tx: broadcast::Sender<SessionState>,
}

impl SessionChannels {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(
        command_buffer: usize,
        state_buffer: usize,
    ) -> (Self, mpsc::Receiver<SessionCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (state_tx, _) = broadcast::channel(state_buffer.max(1));

        (
            Self {
                command_tx,
                state_tx,
            },
            command_rx,
        )
    }

    /// Subscribe to published session states.
    pub fn subscribe(&self) -> StateStream {
        self.state_tx.subscribe()
    }

    /// Send one command to the runtime.
    pub async fn send_command(&self, command: SessionCommand) -> Result<(), SessionChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SessionChannelError::CommandChannelClosed)
    }

    /// Publish a state snapshot to all subscribers.
    ///
    /// Publication is best-effort; lagged subscribers are handled by
    /// `broadcast`.
    pub fn publish(&self, state: SessionState) {
        let _ = self.state_tx.send(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionState;

    #[tokio::test]
    async fn sends_commands_to_receiver() {
        let (channels, mut rx) = SessionChannels::new(8, 8);
        channels
            .send_command(SessionCommand::LoadMore)
            .await
            .expect("command send should work");

        let command = rx.recv().await.expect("receiver should have a command");
        assert_eq!(command, SessionCommand::LoadMore);
    }

    #[tokio::test]
    async fn fans_out_states_to_subscribers() {
        let (channels, _rx) = SessionChannels::new(4, 16);
        let mut a = channels.subscribe();
        let mut b = channels.subscribe();

        channels.publish(SessionState::idle());

        let state_a = a.recv().await.expect("subscriber a should receive state");
        let state_b = b.recv().await.expect("subscriber b should receive state");
        assert_eq!(state_a, state_b);
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_dropped() {
        let (channels, rx) = SessionChannels::new(1, 1);
        drop(rx);
        let err = channels
            .send_command(SessionCommand::Close)
            .await
            .expect_err("send into closed channel must fail");
        assert!(matches!(err, SessionChannelError::CommandChannelClosed));
    }
}
