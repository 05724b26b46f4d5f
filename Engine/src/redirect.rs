/// Standard stream isolation.
///
/// Keeps the target's stdout/stderr chatter away from the engine while
/// preserving a channel for the driver's own diagnostics and for a linked
/// sanitizer runtime.
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;

use libafl_bolts::os::{dup, dup2};
use log::debug;

use crate::error::HarnessError;

const NULL_SINK: &str = "/dev/null";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FdRedirectionPolicy {
    /// Reopen stderr onto this path, appending.
    pub stderr_duplicate: Option<PathBuf>,
    pub discard_stdout: bool,
    /// Duplicate stderr for diagnostics, then discard the original.
    pub discard_stderr: bool,
}

/// The descriptors treated as stdout and stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StdStreams {
    pub stdout: RawFd,
    pub stderr: RawFd,
}

impl Default for StdStreams {
    fn default() -> Self {
        Self {
            stdout: libc::STDOUT_FILENO,
            stderr: libc::STDERR_FILENO,
        }
    }
}

/// Where diagnostics should go once a policy has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticStream {
    pub fd: RawFd,
    /// `fd` is a fresh duplicate of stderr, not stderr itself.
    pub duplicated: bool,
}

#[derive(Debug, Default)]
pub struct StreamRedirector {
    streams: StdStreams,
}

impl StreamRedirector {
    pub fn new(streams: StdStreams) -> Self {
        Self { streams }
    }

    /// Apply `policy`. Any failure here leaves the I/O plumbing in an unknown
    /// state and must be treated as fatal by the caller.
    pub fn apply(&self, policy: &FdRedirectionPolicy) -> Result<DiagnosticStream, HarnessError> {
        let mut diagnostics = DiagnosticStream {
            fd: self.streams.stderr,
            duplicated: false,
        };

        if let Some(path) = &policy.stderr_duplicate {
            let log = OpenOptions::new()
                .read(true)
                .append(true)
                .create(true)
                .open(path)
                .map_err(|source| HarnessError::StderrDuplicate {
                    path: path.clone(),
                    source,
                })?;
            // Both fds stay open across the call; stderr is caller-owned.
            unsafe { dup2(log.as_raw_fd(), self.streams.stderr) }?;
            debug!("stderr now appends to {}", path.display());
        }

        if policy.discard_stdout {
            discard_output(self.streams.stdout)?;
        }

        if policy.discard_stderr {
            // stderr is still open; the duplicate lives for the process.
            let fd = unsafe { dup(self.streams.stderr) }?;
            diagnostics = DiagnosticStream { fd, duplicated: true };
            discard_output(self.streams.stderr)?;
        }

        Ok(diagnostics)
    }
}

fn discard_output(fd: RawFd) -> Result<(), HarnessError> {
    let sink = File::options()
        .write(true)
        .open(NULL_SINK)
        .map_err(HarnessError::NullSink)?;
    // `sink` stays open across the call; `fd` is a caller-owned stream.
    unsafe { dup2(sink.as_raw_fd(), fd) }?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, Write};
    use std::mem::ManuallyDrop;
    use std::os::fd::FromRawFd;

    use super::*;

    /// Two scratch descriptors standing in for stdout and stderr, plus the
    /// files behind them so their contents can be inspected afterwards.
    struct Scratch {
        stdout_file: File,
        stderr_file: File,
        streams: StdStreams,
    }

    impl Scratch {
        fn new() -> Self {
            let stdout_file = tempfile::tempfile().unwrap();
            let stderr_file = tempfile::tempfile().unwrap();
            let streams = unsafe {
                StdStreams {
                    stdout: dup(stdout_file.as_raw_fd()).unwrap(),
                    stderr: dup(stderr_file.as_raw_fd()).unwrap(),
                }
            };
            Self {
                stdout_file,
                stderr_file,
                streams,
            }
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.streams.stdout);
                libc::close(self.streams.stderr);
            }
        }
    }

    fn write_fd(fd: RawFd, text: &str) {
        let mut file = ManuallyDrop::new(unsafe { File::from_raw_fd(fd) });
        file.write_all(text.as_bytes()).unwrap();
    }

    fn contents(file: &mut File) -> String {
        let mut out = String::new();
        file.rewind().unwrap();
        file.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn noop_policy_touches_nothing() {
        let mut scratch = Scratch::new();
        let redirector = StreamRedirector::new(scratch.streams);

        let diag = redirector.apply(&FdRedirectionPolicy::default()).unwrap();
        assert_eq!(
            diag,
            DiagnosticStream {
                fd: scratch.streams.stderr,
                duplicated: false
            }
        );

        write_fd(scratch.streams.stdout, "out");
        write_fd(scratch.streams.stderr, "err");
        assert_eq!(contents(&mut scratch.stdout_file), "out");
        assert_eq!(contents(&mut scratch.stderr_file), "err");
    }

    #[test]
    fn discard_both_keeps_a_duplicate_for_diagnostics() {
        let mut scratch = Scratch::new();
        let redirector = StreamRedirector::new(scratch.streams);
        let policy = FdRedirectionPolicy {
            discard_stdout: true,
            discard_stderr: true,
            ..Default::default()
        };

        let diag = redirector.apply(&policy).unwrap();
        assert!(diag.duplicated);
        assert_ne!(diag.fd, scratch.streams.stderr);

        write_fd(scratch.streams.stdout, "target stdout");
        write_fd(scratch.streams.stderr, "target stderr");
        write_fd(diag.fd, "sanitizer report");

        assert_eq!(contents(&mut scratch.stdout_file), "");
        assert_eq!(contents(&mut scratch.stderr_file), "sanitizer report");
        unsafe { libc::close(diag.fd) };
    }

    #[test]
    fn stderr_duplicate_appends_to_file() {
        let scratch = Scratch::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stderr.log");
        std::fs::write(&path, "previous run\n").unwrap();

        let redirector = StreamRedirector::new(scratch.streams);
        let policy = FdRedirectionPolicy {
            stderr_duplicate: Some(path.clone()),
            ..Default::default()
        };
        let diag = redirector.apply(&policy).unwrap();
        assert!(!diag.duplicated);

        write_fd(scratch.streams.stderr, "stack trace\n");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "previous run\nstack trace\n");
    }

    #[test]
    fn duplicate_then_discard_still_reaches_the_log_file() {
        let scratch = Scratch::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stderr.log");

        let redirector = StreamRedirector::new(scratch.streams);
        let policy = FdRedirectionPolicy {
            stderr_duplicate: Some(path.clone()),
            discard_stderr: true,
            ..Default::default()
        };
        let diag = redirector.apply(&policy).unwrap();

        write_fd(scratch.streams.stderr, "target noise\n");
        write_fd(diag.fd, "report\n");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "report\n");
        unsafe { libc::close(diag.fd) };
    }

    #[test]
    fn unopenable_duplicate_path_is_an_error() {
        let scratch = Scratch::new();
        let redirector = StreamRedirector::new(scratch.streams);
        let policy = FdRedirectionPolicy {
            stderr_duplicate: Some(PathBuf::from("/nonexistent/dir/stderr.log")),
            ..Default::default()
        };

        let err = redirector.apply(&policy).unwrap_err();
        assert!(matches!(err, HarnessError::StderrDuplicate { .. }));
    }
}
