pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod password;
pub mod store;

pub use completion::{CompletionClient, CompletionError, ReplyContent};
pub use config::GeochatConfig;
pub use error::StoreError;
pub use models::{ChatHistory, Conversation, NewUser, Role, Turn, User};
