// Public API for integration tests and potential library usage

pub mod api;
pub mod error;
pub mod llm;
pub mod protocol;
pub mod state;
pub mod store;
pub mod types;
pub mod watch;
pub mod ws;
