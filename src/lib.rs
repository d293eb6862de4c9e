// Public API for integration tests and potential library usage

pub mod api;
pub mod client;
pub mod error;
pub mod game;
pub mod llm;
pub mod protocol;
pub mod server;
pub mod state;
pub mod store;
pub mod types;
pub mod ws;
