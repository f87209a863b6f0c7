//! In-memory [`ChatClient`] for unit tests.

use super::{ChannelId, ChatClient, ChatError, MessageHandle, UserId};
use crate::render::RenderedMessage;
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Send(ChannelId, RenderedMessage),
    SendText(ChannelId, String),
    Edit(MessageHandle, RenderedMessage),
    Delete(MessageHandle),
    AddMarker(MessageHandle, String),
    RemoveMarker(MessageHandle, String, Option<UserId>),
    ClearMarkers(MessageHandle),
}

pub const BOT_ID: UserId = 1;

#[derive(Default)]
pub struct FakeChat {
    calls: Mutex<Vec<Call>>,
    next_id: Mutex<u64>,
    /// Sends beyond this many fail with a 500.
    send_limit: Mutex<Option<usize>>,
}

impl FakeChat {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(100),
            ..Default::default()
        }
    }

    pub fn fail_sends_after(&self, n: usize) {
        *self.send_limit.lock().unwrap() = Some(n);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<RenderedMessage> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send(_, m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::SendText(_, t) => Some(t),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn allocate(&self, channel: ChannelId) -> Result<MessageHandle, ChatError> {
        let sends = self
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Send(..) | Call::SendText(..)))
            .count();
        if let Some(limit) = *self.send_limit.lock().unwrap() {
            if sends > limit {
                return Err(ChatError::Api {
                    status: 500,
                    body: "send refused".to_string(),
                });
            }
        }
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        Ok(MessageHandle {
            channel_id: channel,
            message_id: *id,
        })
    }
}

#[async_trait]
impl ChatClient for FakeChat {
    async fn wait_until_ready(&self) -> Result<UserId, ChatError> {
        Ok(BOT_ID)
    }

    async fn send_message(
        &self,
        channel: ChannelId,
        message: &RenderedMessage,
    ) -> Result<MessageHandle, ChatError> {
        self.record(Call::Send(channel, message.clone()));
        self.allocate(channel)
    }

    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<MessageHandle, ChatError> {
        self.record(Call::SendText(channel, text.to_string()));
        self.allocate(channel)
    }

    async fn edit_message(
        &self,
        handle: MessageHandle,
        message: &RenderedMessage,
    ) -> Result<(), ChatError> {
        self.record(Call::Edit(handle, message.clone()));
        Ok(())
    }

    async fn delete_message(&self, handle: MessageHandle) -> Result<(), ChatError> {
        self.record(Call::Delete(handle));
        Ok(())
    }

    async fn add_marker(&self, handle: MessageHandle, marker: &str) -> Result<(), ChatError> {
        self.record(Call::AddMarker(handle, marker.to_string()));
        Ok(())
    }

    async fn remove_marker(
        &self,
        handle: MessageHandle,
        marker: &str,
        user: Option<UserId>,
    ) -> Result<(), ChatError> {
        self.record(Call::RemoveMarker(handle, marker.to_string(), user));
        Ok(())
    }

    async fn clear_markers(&self, handle: MessageHandle) -> Result<(), ChatError> {
        self.record(Call::ClearMarkers(handle));
        Ok(())
    }
}
