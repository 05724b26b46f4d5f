/// Deferred forkserver handshake.
///
/// The forkserver scans the binary for the two signatures below and, when it
/// finds the deferred one, waits for `manual_init` instead of forking right
/// after startup. Nothing in the driver reads the signatures.
use std::io;

use log::debug;

use crate::config::DEFER_FORKSRV_VAR;
use crate::coverage_map::{CoverageMap, MapBackend};
use crate::error::HarnessError;
use crate::runtime::Runtime;

#[used]
#[unsafe(no_mangle)]
pub static AFL_PERSISTENT_SIGNATURE: [u8; 22] = *b"##SIG_AFL_PERSISTENT##";

#[used]
#[unsafe(no_mangle)]
pub static AFL_DEFER_FORKSRV_SIGNATURE: [u8; 25] = *b"##SIG_AFL_DEFER_FORKSRV##";

#[derive(Debug)]
pub struct DeferredInit {
    var: &'static str,
    deferred: bool,
    signaled: bool,
}

impl DeferredInit {
    pub fn new(dont_defer: bool) -> Self {
        Self::for_variable(DEFER_FORKSRV_VAR, dont_defer)
    }

    pub fn for_variable(var: &'static str, dont_defer: bool) -> Self {
        Self {
            var,
            deferred: !dont_defer,
            signaled: false,
        }
    }

    /// Announce (or withdraw) deferred mode in the environment the forkserver
    /// reads. Must run before anything else touches the runtime.
    pub fn prepare(&self) -> Result<(), HarnessError> {
        if self.var.is_empty() || self.var.contains(&['=', '\0'][..]) {
            return Err(HarnessError::Environment {
                action: "encode",
                var: self.var,
                source: io::Error::from(io::ErrorKind::InvalidInput),
            });
        }

        // std serializes this with its own environment reads. No target code
        // has run yet.
        if self.deferred {
            unsafe { std::env::set_var(self.var, "1") };
        } else {
            unsafe { std::env::remove_var(self.var) };
        }
        debug!("deferred forkserver mode: {}", self.deferred);
        Ok(())
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    pub fn signaled(&self) -> bool {
        self.signaled
    }

    /// Tell the forkserver setup is done, then hand the address range of the
    /// placeholder map over to the real instrumentation.
    ///
    /// The runtime attaches its real map inside `manual_init` and must find
    /// the coverage pointer null by then. The placeholder is unmapped only once
    /// the signal is out.
    ///
    /// Workers may be forked as soon as the signal is out, so every one-time
    /// target setup must already have run.
    pub fn complete<R, B>(&mut self, runtime: &mut R, map: &mut CoverageMap<B>)
    where
        R: Runtime,
        B: MapBackend,
    {
        if self.signaled {
            return;
        }
        map.retract(runtime);
        runtime.manual_init();
        self.signaled = true;
        map.release(runtime);
    }
}
