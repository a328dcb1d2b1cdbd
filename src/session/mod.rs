/// Session management module - Gateway

mod chat;

pub use chat::{ChatSession, SessionId};
