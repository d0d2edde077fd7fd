//! Command line interface
//!
//! Argument parsing lives in [`args`], dispatch in [`router`] and one module per
//! subcommand under [`commands`].

pub mod args;
pub mod commands;
pub mod router;

pub use args::{Cli, Commands};
pub use router::execute_command;
