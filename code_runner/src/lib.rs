//! Client for the remote code execution engine.
//!
//! [`engine`] sends student code and test inputs to the engine over HTTP and
//! [`events`] decodes the typed output stream it returns. Callers normally go
//! through [`engine::run_tests`], which never fails: transport and decoding
//! problems come back as a single [`events::ExecutionEvent::Error`].

pub mod engine;
pub mod error;
pub mod events;

pub use engine::{ExecutionEngine, ExecutionRequest, HttpExecutionEngine, run_tests};
pub use error::ExecutionError;
pub use events::{ExecutionEvent, TestStats, decode_events, first_error, test_stats};
