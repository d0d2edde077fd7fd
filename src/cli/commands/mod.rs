//! Command implementation modules
//!
//! Each subcommand lives in its own module and returns `anyhow::Result`; failures
//! that should map to a specific exit code are raised as [`crate::error::ProbeError`].

pub mod check;
pub mod extract;
pub mod observe;
pub mod poll;

pub use check::run_check_command;
pub use extract::run_extract_command;
pub use observe::run_observe_command;
pub use poll::run_poll_command;
