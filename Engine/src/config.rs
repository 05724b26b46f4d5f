/// Operator configuration read from the environment.
use std::ffi::OsString;
use std::path::PathBuf;

use crate::redirect::FdRedirectionPolicy;

/// When set, the forkserver is told not to wait for the deferred-init signal.
pub const DONT_DEFER_VAR: &str = "AFL_DRIVER_DONT_DEFER";
/// Path that stderr is appended to.
pub const STDERR_DUPLICATE_VAR: &str = "AFL_DRIVER_STDERR_DUPLICATE_FILENAME";
/// Bitmask: bit 0 discards stdout, bit 1 duplicates then discards stderr.
pub const CLOSE_FD_MASK_VAR: &str = "AFL_DRIVER_CLOSE_FD_MASK";
/// When set, the placeholder map is kept and instrumentation never attaches.
pub const DISABLE_INSTRUMENTATION_VAR: &str = "AFL_DISABLE_LLVM_INSTRUMENTATION";
/// The variable the forkserver inspects to decide whether to wait for us.
pub const DEFER_FORKSRV_VAR: &str = "__AFL_DEFER_FORKSRV";

const DISCARD_STDOUT_BIT: i64 = 1;
const DISCARD_STDERR_BIT: i64 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverConfig {
    pub dont_defer: bool,
    pub stderr_duplicate: Option<PathBuf>,
    pub close_fd_mask: Option<String>,
    pub disable_instrumentation: bool,
}

impl DriverConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var_os(var))
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        Self {
            dont_defer: lookup(DONT_DEFER_VAR).is_some(),
            stderr_duplicate: lookup(STDERR_DUPLICATE_VAR).map(PathBuf::from),
            close_fd_mask: lookup(CLOSE_FD_MASK_VAR).map(|v| v.to_string_lossy().into_owned()),
            disable_instrumentation: lookup(DISABLE_INSTRUMENTATION_VAR).is_some(),
        }
    }

    /// The fd mask as a number. Unset or non-numeric values mean 0. Negative
    /// values keep their two's complement bits, so `-2` still discards stderr.
    pub fn close_fd_mask_or_default(&self) -> i64 {
        self.close_fd_mask.as_deref().map_or(0, leading_int)
    }

    pub fn redirection_policy(&self) -> FdRedirectionPolicy {
        let mask = self.close_fd_mask_or_default();
        FdRedirectionPolicy {
            stderr_duplicate: self.stderr_duplicate.clone(),
            discard_stdout: mask & DISCARD_STDOUT_BIT != 0,
            discard_stderr: mask & DISCARD_STDERR_BIT != 0,
        }
    }
}

/// Parse a leading decimal integer the way C's `atoi` does: optional
/// whitespace and sign, then digits, stopping at the first non-digit.
fn leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let value = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, d| acc.saturating_mul(10).saturating_add(i64::from(d - b'0')));
    if negative { -value } else { value }
}
