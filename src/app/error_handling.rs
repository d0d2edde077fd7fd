//! Error handling utilities

use tracing::error;

use crate::error::ProbeError;

/// Print `error` and exit with the matching status code.
///
/// A [`ProbeError`] prints its user message, plus the full cause chain with `-v`.
/// Anything else prints its message and exits with 1.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    error!("Fatal error: {}", error);
    std::process::exit(report(&error, verbose))
}

fn report(error: &anyhow::Error, verbose: u8) -> i32 {
    if let Some(probe_err) = error.downcast_ref::<ProbeError>() {
        eprintln!("{}", probe_err.user_message());
        if verbose >= 1 {
            eprintln!("\nContext Chain:\n{}", probe_err.developer_message());
        }
        return probe_err.exit_code();
    }

    eprintln!("Error: {error}");
    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }
    1
}
