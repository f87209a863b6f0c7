use super::{InputEvent, InputSource, MessageId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;

/// Per-session queue depth. Users cannot click faster than this drains.
const SESSION_QUEUE: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("A session is already active for message {0}")]
    AlreadyActive(MessageId),
}

/// Routes host input events to the session owning the target message.
///
/// At most one session is registered per message id. Dropping the
/// [`Registration`] releases the id.
#[derive(Clone, Default)]
pub struct InteractionHub {
    sessions: Arc<Mutex<HashMap<MessageId, mpsc::Sender<InputEvent>>>>,
}

impl InteractionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, message_id: MessageId) -> Result<Registration, SessionError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if sessions.contains_key(&message_id) {
            return Err(SessionError::AlreadyActive(message_id));
        }
        let (tx, rx) = mpsc::channel(SESSION_QUEUE);
        sessions.insert(message_id, tx);
        Ok(Registration {
            message_id,
            rx,
            sessions: Arc::clone(&self.sessions),
        })
    }

    /// Forwards `event` to its session. Returns `false` when no session owns
    /// the message or the session's queue is full.
    pub fn dispatch(&self, event: InputEvent) -> bool {
        let sender = {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.get(&event.message_id()).cloned()
        };
        match sender {
            Some(tx) => match tx.try_send(event) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping input event for busy session");
                    false
                }
            },
            None => false,
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A session's claim on one message id, and its input stream.
pub struct Registration {
    message_id: MessageId,
    rx: mpsc::Receiver<InputEvent>,
    sessions: Arc<Mutex<HashMap<MessageId, mpsc::Sender<InputEvent>>>>,
}

impl Registration {
    pub fn message_id(&self) -> MessageId {
        self.message_id
    }
}

#[async_trait]
impl InputSource for Registration {
    async fn next_event(&mut self) -> Option<InputEvent> {
        self.rx.recv().await
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(&self.message_id);
    }
}

/// [`InputSource`] over a plain channel, for hosts that already demultiplex
/// events themselves.
pub struct ChannelInputSource {
    rx: mpsc::Receiver<InputEvent>,
}

impl ChannelInputSource {
    pub fn new(rx: mpsc::Receiver<InputEvent>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl InputSource for ChannelInputSource {
    async fn next_event(&mut self) -> Option<InputEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reaction(message_id: MessageId) -> InputEvent {
        InputEvent::Reaction {
            message_id,
            user_id: 1,
            emoji: "▶️".to_string(),
        }
    }

    #[test]
    fn test_second_registration_refused() {
        let hub = InteractionHub::new();
        let _first = hub.register(7).unwrap();
        assert_eq!(hub.register(7).err(), Some(SessionError::AlreadyActive(7)));
    }

    #[test]
    fn test_drop_releases_message_id() {
        let hub = InteractionHub::new();
        let first = hub.register(7).unwrap();
        assert_eq!(hub.active_sessions(), 1);
        drop(first);
        assert_eq!(hub.active_sessions(), 0);
        assert!(hub.register(7).is_ok());
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_message_id() {
        let hub = InteractionHub::new();
        let mut a = hub.register(1).unwrap();
        let mut b = hub.register(2).unwrap();

        assert!(hub.dispatch(reaction(2)));
        assert!(hub.dispatch(reaction(1)));
        assert!(!hub.dispatch(reaction(3)));

        assert_eq!(a.next_event().await, Some(reaction(1)));
        assert_eq!(b.next_event().await, Some(reaction(2)));
    }

    #[tokio::test]
    async fn test_channel_source_ends_when_sender_dropped() {
        let (tx, rx) = mpsc::channel(1);
        let mut source = ChannelInputSource::new(rx);
        tx.send(reaction(1)).await.unwrap();
        drop(tx);
        assert_eq!(source.next_event().await, Some(reaction(1)));
        assert_eq!(source.next_event().await, None);
    }
}
