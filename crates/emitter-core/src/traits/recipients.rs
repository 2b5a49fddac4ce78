//! Eligible-recipient enumeration.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Recipient;

/// Returns the current recipient set. Queried fresh every cycle.
#[async_trait]
pub trait RecipientSource: Send + Sync {
    async fn eligible_recipients(&self) -> Result<Vec<Recipient>>;
}
