pub mod broadcast;
pub mod channel;
pub mod client;
pub mod server;

pub use broadcast::Broadcaster;
pub use client::ClientRegistry;
pub use server::{start, ServerConfig, ServerHandle};
