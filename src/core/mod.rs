pub mod message;
pub mod responder;

pub use message::{ConversationKey, Message, Role, WriteOutcome};
pub use responder::{MockResponder, Responder};
