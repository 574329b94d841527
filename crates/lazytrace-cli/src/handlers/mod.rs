//! Command handlers - extracted from main.rs for testability

pub mod instrument;
pub mod trace;

pub use instrument::execute_instrument;
pub use trace::{execute_trace, exit_status, session_config};
