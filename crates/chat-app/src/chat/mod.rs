pub mod controller;
pub mod error;
pub mod events;
pub mod history;
pub mod message;
pub mod state;

pub use controller::{DeliveryConfig, StreamController, StreamSession};
pub use error::{ChatError, ChatResult};
pub use events::{FailureKind, Stop, StreamOutcome, Submit};
pub use message::{
    Conversation, ConversationId, MessageId, RawMessage, Sender, StreamState, StreamTarget,
    StreamTransition, StreamTransitionRejection,
};
pub use state::{ChatSnapshot, ChatState};
