/// Run-mode resolution and the persistent loop.
use core::num::NonZeroU32;
use std::ffi::OsString;
use std::io::Read;
use std::path::PathBuf;

use log::warn;

use crate::error::HarnessError;
use crate::input::{InputDispatcher, Pull};
use crate::runtime::Runtime;
use crate::targets::{Target, TargetInvoker};

/// Iterations to run before the forkserver re-spawns the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationBudget(NonZeroU32);

impl IterationBudget {
    pub const UNBOUNDED: IterationBudget =
        IterationBudget(NonZeroU32::new(i32::MAX as u32).unwrap());

    pub fn new(n: u32) -> Option<Self> {
        NonZeroU32::new(n).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Parse a budget that must fit a positive C `int`.
    fn parse(raw: &str, arg: &OsString) -> Result<Self, HarnessError> {
        raw.parse::<i32>()
            .ok()
            .and_then(|n| u32::try_from(n).ok())
            .and_then(Self::new)
            .ok_or_else(|| HarnessError::InvalidBudget(arg.to_string_lossy().into_owned()))
    }
}

impl Default for IterationBudget {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    BatchFile(Vec<PathBuf>),
    PersistentLoop(IterationBudget),
}

impl RunMode {
    /// Decide the mode from the full argument vector, program name first.
    ///
    /// * no arguments: persistent, unbounded
    /// * `-N`: persistent, N iterations; N must be positive
    /// * `N`: same, deprecated spelling
    /// * anything else: every argument is an input file
    pub fn from_args(args: &[OsString]) -> Result<Self, HarnessError> {
        let program = args
            .first()
            .map_or_else(|| "driver".into(), |p| p.to_string_lossy().into_owned());
        let rest = args.get(1..).unwrap_or_default();

        match rest {
            [] => Ok(RunMode::PersistentLoop(IterationBudget::UNBOUNDED)),
            [arg] => {
                let text = arg.to_string_lossy();
                if let Some(raw) = text.strip_prefix('-') {
                    return IterationBudget::parse(raw, arg).map(RunMode::PersistentLoop);
                }
                let bare = text
                    .parse::<i32>()
                    .ok()
                    .and_then(|n| u32::try_from(n).ok())
                    .and_then(IterationBudget::new);
                match bare {
                    Some(budget) => {
                        warn!("using the deprecated call style `{program} {}`", budget.get());
                        Ok(RunMode::PersistentLoop(budget))
                    }
                    None => Ok(RunMode::BatchFile(vec![PathBuf::from(arg)])),
                }
            }
            paths => Ok(RunMode::BatchFile(paths.iter().map(PathBuf::from).collect())),
        }
    }
}

/// Drives the runtime's loop primitive.
///
/// The primitive owns the continue/respawn decision. We only pass the budget
/// along and feed one input per granted iteration.
#[derive(Debug)]
pub struct PersistentLoop {
    budget: IterationBudget,
}

impl PersistentLoop {
    pub fn new(budget: IterationBudget) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> IterationBudget {
        self.budget
    }

    pub fn run<R, T, I>(
        &self,
        runtime: &mut R,
        inputs: &mut InputDispatcher<I>,
        invoker: &mut TargetInvoker<T>,
    ) where
        R: Runtime,
        T: Target,
        I: Read,
    {
        while runtime.persistent_loop(self.budget.get()) {
            if let Pull::Input(data) | Pull::File(_, data) = inputs.next_input() {
                invoker.invoke(data);
            }
        }
    }
}
