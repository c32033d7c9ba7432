//! Process wiring for the clipchain worker binary.

pub mod cli;
pub mod config;

pub use cli::{Cli, Command, ManageCommand};
pub use config::WorkerConfig;
