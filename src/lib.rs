pub mod app;
pub mod client;
pub mod config;
pub mod decoder;
pub mod handler;
pub mod logging;
pub mod session;
pub mod state;
pub mod tui;
pub mod ui;

// Re-export main types for convenience
pub use client::{ChatTransport, HttpChatClient, ReplyBody, SendError};
pub use config::Config;
pub use decoder::{DecodeError, DecodeMode, Utf8Decoder};
pub use session::{stream_reply, Outgoing, Session, StreamEvent};
pub use state::{ChatMessage, ChatRole, Conversation, ConversationError};
