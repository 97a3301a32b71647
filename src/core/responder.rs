//! Mock assistant used by the chat loop in place of a real model.

use super::message::Message;

pub const MOCK_REPLY: &str = "This is a mock response from the AI.";

/// Produces the assistant's reply to a conversation
pub trait Responder: Send + Sync {
    fn respond(&self, history: &[Message]) -> Message;
}

/// Always answers with the same canned text
#[derive(Debug, Default, Clone)]
pub struct MockResponder;

impl Responder for MockResponder {
    fn respond(&self, _history: &[Message]) -> Message {
        Message::assistant(MOCK_REPLY)
    }
}
