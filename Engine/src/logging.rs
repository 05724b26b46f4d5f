/// Diagnostic output for the driver itself.
///
/// All harness diagnostics go through one process-global descriptor. It starts
/// out as stderr and is retargeted once stderr has been duplicated, so that a
/// later discard of the original stderr never swallows driver output.
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::mem::ManuallyDrop;
use std::os::fd::{FromRawFd, RawFd};

use env_logger::{Builder, Env, Target};
use spin::Mutex;

static DIAGNOSTIC_FD: Mutex<RawFd> = Mutex::new(libc::STDERR_FILENO);

/// Route all subsequent diagnostics to `fd`.
pub fn set_diagnostic_fd(fd: RawFd) {
    *DIAGNOSTIC_FD.lock() = fd;
}

pub fn diagnostic_fd() -> RawFd {
    *DIAGNOSTIC_FD.lock()
}

/// Install the `env_logger` backend writing to the diagnostic descriptor.
///
/// Filter comes from `RUST_LOG`, defaulting to `info`. Calling this twice is harmless.
pub fn init() {
    let _ = Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .target(Target::Pipe(Box::new(DiagnosticWriter)))
        .try_init();
}

/// Write directly to the diagnostic descriptor, bypassing the logger.
pub fn write_diagnostic(args: fmt::Arguments<'_>) {
    let _ = DiagnosticWriter.write_fmt(args);
}

/// `Write` adapter over whatever descriptor is currently the diagnostic stream.
pub struct DiagnosticWriter;

impl Write for DiagnosticWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let fd = DIAGNOSTIC_FD.lock();
        // The descriptor is borrowed, never closed here.
        let mut file = ManuallyDrop::new(unsafe { File::from_raw_fd(*fd) });
        file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
