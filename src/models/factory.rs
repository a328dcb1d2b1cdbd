use anyhow::Result;
use std::sync::Arc;

use super::client::BackendClient;
use super::echo::EchoBackend;
use super::gemini::GeminiBackend;
use super::traits::Backend;
use crate::app::BackendSettings;

/// Factory for creating backend instances from configuration
pub struct BackendFactory;

impl BackendFactory {
    /// Create the configured provider.
    /// Remote providers resolve their credential here, so a missing key fails startup.
    pub fn create(settings: &BackendSettings) -> Result<Arc<dyn Backend>> {
        match settings.provider.as_str() {
            "gemini" | "google" => {
                let api_key = settings.credential()?;
                Ok(Arc::new(GeminiBackend::new(settings, api_key)?))
            }
            "echo" => Ok(Arc::new(EchoBackend::new())),
            other => anyhow::bail!(
                "Unknown backend provider '{}'. Expected 'gemini' or 'echo'",
                other
            ),
        }
    }

    /// Create the provider wrapped with the configured deadline and retry policy
    pub fn client(settings: &BackendSettings) -> Result<BackendClient> {
        let backend = Self::create(settings)?;
        Ok(BackendClient::from_settings(backend, settings))
    }

    /// Providers this build knows about
    pub fn list_available() -> &'static [&'static str] {
        &["gemini", "echo"]
    }
}
