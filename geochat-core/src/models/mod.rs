pub mod conversation;
pub mod user;

pub use conversation::{ChatHistory, Conversation, Role, Turn, SYSTEM_PROMPT};
pub use user::{NewUser, User};
