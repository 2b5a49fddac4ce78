//! # Emitter Core
//!
//! Shared building blocks for the emission engine: configuration, the error
//! type, domain types and the traits that external collaborators implement
//! (delivery channel, artifact renderer, recipient source, event store).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::EmitterConfig;
pub use error::{EmitterError, Result};
