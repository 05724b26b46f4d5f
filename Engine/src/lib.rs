//! aflpp_driver - run libFuzzer-style targets under AFL++ persistent mode
//!
//! Links into a C/C++ target as a static library. The driver reserves a
//! placeholder coverage map, isolates the target's stdout/stderr, performs the
//! deferred forkserver handshake after one-time setup, and then feeds inputs
//! from fd 0 to the target for as long as the forkserver's loop primitive
//! allows. Given file arguments it runs each file once instead.
//!
//! With the `afl` feature the crate exports a C `main`; without it, use
//! [`Driver`] with any [`Target`] and [`Runtime`].

pub mod config;
pub mod coverage_map;
pub mod deferred;
pub mod driver;
pub mod error;
pub mod hooks;
pub mod input;
pub mod logging;
pub mod persistent;
pub mod redirect;
pub mod runtime;
pub mod targets;

#[cfg(feature = "afl")]
pub mod ffi;

pub use config::DriverConfig;
pub use coverage_map::{CoverageMap, MapBackend, MapStrategy, MmapBackend};
pub use driver::{Driver, RunSummary};
pub use error::HarnessError;
pub use persistent::{IterationBudget, RunMode};
pub use redirect::{FdRedirectionPolicy, StdStreams};
pub use runtime::{Runtime, StandaloneRuntime};
pub use targets::{CTarget, Target};

#[cfg(feature = "afl")]
pub use runtime::AflRuntime;
