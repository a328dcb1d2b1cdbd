/// Runtime orchestrator module - Gateway

mod orchestrator;

pub use orchestrator::{shutdown_signal, Orchestrator};
