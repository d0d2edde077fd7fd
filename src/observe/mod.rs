//! Live observation of a streaming command
//!
//! [`StreamingObserver`] starts a long-running command (typically a flow stream),
//! captures its output as it arrives and answers "did a matching line show up before
//! the deadline?" without tying the deadline to the life of the process.

mod buffer;
mod observer;
mod types;


pub use buffer::TailBuffer;
pub use observer::StreamingObserver;
pub use types::{
    Diagnostics, MatchResult, ObservedLine, ObserverConfig, ObserverState, WaitError, WaitRequest,
};
