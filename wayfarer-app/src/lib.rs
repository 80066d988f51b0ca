//! Wayfarer terminal application: startup wiring and the chat REPL.

pub mod bootstrap;
pub mod repl;

pub use bootstrap::{init_tracing, Bootstrap, CliArgs};
pub use repl::{Command, Repl};
