// Gateway module for models - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod client;
mod echo;
mod factory;
mod gemini;
mod traits;
mod types;

// Public re-exports - the ONLY way to access model functionality
pub use client::{BackendClient, RetryPolicy};
pub use echo::EchoBackend;
pub use factory::BackendFactory;
pub use gemini::GeminiBackend;
pub use traits::Backend;
pub use types::{Role, Turn};
