//! # flowprobe
//!
//! Assert that network flow records show up in a live observation stream within a
//! deadline.
//!
//! ## Usage
//!
//! ```bash
//! flowprobe check --pod hubble-cli-x7k2p -n kube-system --type trace --to-port 80 \
//!     --field '{$.Type}' --equals L3_L4 --trigger-url http://10.96.0.12/public
//! ```
//!
//! ## Modules
//!
//! - `subprocess` - Local process execution behind a mockable runner
//! - `remote` - Commands bound to a pod and the transport that reaches it
//! - `observe` - Streaming observer with deadline-bounded waits
//! - `poll` - Poll a one-shot command until its output matches
//! - `extract` - Field paths and matchers over JSON lines
//! - `flows` - Flow observation queries, curl triggers and flow metrics
//! - `visibility` - Proxy visibility annotations
//! - `check` - Observe, trigger, wait and verify in one step
//! - `config` - Configuration file and environment overrides
//! - `error` - Crate-wide error type and error codes
pub mod app;
pub mod check;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod flows;
pub mod observe;
pub mod poll;
pub mod remote;
pub mod subprocess;
pub mod visibility;
