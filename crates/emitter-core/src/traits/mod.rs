//! Collaborator traits. The engine only talks to the outside world through these.

pub mod channel;
pub mod recipients;
pub mod renderer;
pub mod store;

pub use channel::Channel;
pub use recipients::RecipientSource;
pub use renderer::ArtifactRenderer;
pub use store::EventStore;
