/// Constants module to avoid magic numbers in the codebase

// Network Configuration
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8000;

// Backend
pub const DEFAULT_PROVIDER: &str = "gemini";
pub const DEFAULT_MODEL: &str = "gemini-1.5-pro-latest";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_API_KEY_ENV: &str = "GOOGLE_API_KEY";

// Timeouts
pub const BACKEND_TIMEOUT_SECS: u64 = 120;
pub const HEALTH_CHECK_TIMEOUT_SECS: u64 = 3;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

// Retry
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
pub const MAX_RETRY_BACKOFF_MS: u64 = 8_000;

// Frames
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;
pub const MAX_QUEUED_FRAMES: usize = 8;
pub const TRANSPORT_HEADROOM_BYTES: usize = 64 * 1024;
pub const ERROR_FRAME_PREFIX: &str = "error: ";

// Environment
pub const ENV_PREFIX: &str = "CHAT_RELAY_";
pub const APP_NAME: &str = "chat-relay";
