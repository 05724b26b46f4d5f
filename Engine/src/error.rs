/// Error taxonomy for the driver.
///
/// Every variant here is a fatal configuration or plumbing error: the entry
/// point reports it on the diagnostic stream and aborts. Soft I/O failures
/// (unreadable batch files, empty stream reads) never become a `HarnessError`.
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to duplicate stderr to {}: {source}", path.display())]
    StderrDuplicate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open the null sink: {0}")]
    NullSink(#[source] std::io::Error),

    #[error("descriptor operation failed: {0}")]
    Descriptor(#[from] libafl_bolts::Error),

    #[error("failed to {action} {var}: {source}")]
    Environment {
        action: &'static str,
        var: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("mapping the placeholder coverage map failed: {0}")]
    Map(#[from] nix::Error),

    #[error("placeholder map landed at {actual:#x} instead of {expected:#x}")]
    MapMisplaced { expected: usize, actual: usize },

    #[error("invalid iteration budget `{0}`: must be a positive integer")]
    InvalidBudget(String),
}

/// Report `err` on the current diagnostic stream and abort the process.
///
/// There is no degraded mode for broken I/O plumbing or bad configuration.
pub fn fatal(err: HarnessError) -> ! {
    crate::logging::write_diagnostic(format_args!("aflpp_driver: fatal: {err}\n"));
    std::process::abort()
}
