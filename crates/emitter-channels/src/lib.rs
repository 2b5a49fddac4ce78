//! # Emitter Channels
//! Delivery channel implementations.

pub mod telegram;

pub use telegram::TelegramChannel;
