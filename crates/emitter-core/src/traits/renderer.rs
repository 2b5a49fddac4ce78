//! Artifact renderer trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Artifact;

/// Produces the content of one broadcast cycle.
/// An error aborts the whole cycle before anything is sent.
#[async_trait]
pub trait ArtifactRenderer: Send + Sync {
    async fn render(&self) -> Result<Artifact>;
}
