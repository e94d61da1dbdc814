pub mod conversation;
pub mod user;
