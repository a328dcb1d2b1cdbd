use async_trait::async_trait;

use super::types::Turn;
use crate::utils::BackendError;

/// Core trait that all generation backends must implement
#[async_trait]
pub trait Backend: Send + Sync {
    /// Generate the next assistant reply for an ordered history.
    /// The last turn is the user message being answered.
    async fn generate(&self, history: &[Turn]) -> Result<String, BackendError>;

    /// Get the name of the backend model
    fn name(&self) -> &str;

    /// Validate that the backend is reachable with the configured credential
    async fn validate_connection(&self) -> Result<bool, BackendError> {
        Ok(true)
    }
}
