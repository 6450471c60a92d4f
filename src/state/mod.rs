pub mod conversation;

pub use conversation::ConversationStateStore;
