//! Socket.IO client for the bot's realtime channel.

pub mod client;
pub mod packet;
pub mod retry;
pub mod transport;

pub use client::{RealtimeClient, RealtimeMessage, Session, SessionEnd};
pub use packet::RealtimeEvent;
