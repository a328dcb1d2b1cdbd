pub mod app;
pub mod cli;
pub mod constants;
pub mod models;
pub mod runtime;
pub mod server;
pub mod session;
pub mod utils;

pub use app::{load_config, Config};
pub use models::{Backend, BackendClient, BackendFactory, Role, Turn};
pub use server::{ServeHandle, Server};
pub use session::ChatSession;
pub use utils::{BackendError, RelayError, TurnError};
