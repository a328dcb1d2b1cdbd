use async_trait::async_trait;

use super::traits::Backend;
use super::types::{Role, Turn};
use crate::utils::BackendError;

/// Backend that answers with the latest user turn, for local runs without a key
#[derive(Debug, Default, Clone)]
pub struct EchoBackend;

impl EchoBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Backend for EchoBackend {
    async fn generate(&self, history: &[Turn]) -> Result<String, BackendError> {
        history
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.text.clone())
            .ok_or_else(|| BackendError::Rejected("no user turn to answer".to_string()))
    }

    fn name(&self) -> &str {
        "echo"
    }
}
