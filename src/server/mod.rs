// Gateway module for the WebSocket server - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod frame;
mod handler;
mod listener;

// Public re-exports - the ONLY way to access server functionality
pub use frame::{error_frame, FrameLimits, Inbound};
pub use handler::ConnectionHandler;
pub use listener::{ServeHandle, Server};
