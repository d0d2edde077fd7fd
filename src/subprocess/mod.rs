//! Local process execution
//!
//! Everything that touches an OS process goes through [`ProcessRunner`], so the remote
//! executor, the observer and the poller can all be driven by [`MockProcessRunner`]
//! in tests.

pub mod builder;
pub mod error;
pub mod handle;
pub mod mock;
pub mod runner;


pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use handle::{OutputLine, ProcessControl, ProcessHandle, StreamSource};
pub use mock::{MockCommandConfig, MockProcessRunner, MockStreamConfig};
pub use runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};
