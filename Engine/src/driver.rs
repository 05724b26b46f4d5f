/// Driver builder: wires target, runtime and configuration into one run.
use std::ffi::OsString;
use std::io::Read;

use log::{debug, info};

use crate::config::DriverConfig;
use crate::coverage_map::{CoverageMap, MapBackend, MmapBackend};
use crate::deferred::DeferredInit;
use crate::error::HarnessError;
use crate::input::{BatchFiles, InputDispatcher, Pull, Stdin, StreamInput};
use crate::logging;
use crate::persistent::{PersistentLoop, RunMode};
use crate::redirect::{StdStreams, StreamRedirector};
use crate::runtime::Runtime;
use crate::targets::{Target, TargetInvoker};

/// What a finished run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub mode: RunMode,
    /// Real target invocations, warm-up excluded.
    pub executions: u64,
    pub deferred_signaled: bool,
}

/// Builder for a driver run.
///
/// # Example
/// ```rust,no_run
/// use aflpp_driver::{Driver, StandaloneRuntime};
///
/// let target = |data: &[u8]| i32::from(data.first() == Some(&b'H'));
/// Driver::new(target, StandaloneRuntime::new())
///     .run(std::env::args_os().collect())
///     .unwrap();
/// ```
pub struct Driver<T, R, B = MmapBackend, I = Stdin> {
    target: T,
    runtime: R,
    map: CoverageMap<B>,
    config: DriverConfig,
    streams: StdStreams,
    input: I,
}

impl<T, R> Driver<T, R>
where
    T: Target,
    R: Runtime,
{
    /// A driver reading configuration from the environment and inputs from fd 0.
    pub fn new(target: T, runtime: R) -> Self {
        Self {
            target,
            runtime,
            map: CoverageMap::new(),
            config: DriverConfig::from_env(),
            streams: StdStreams::default(),
            input: Stdin::new(),
        }
    }
}

impl<T, R, B, I> Driver<T, R, B, I>
where
    T: Target,
    R: Runtime,
    B: MapBackend,
    I: Read,
{
    pub fn config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Descriptors treated as stdout/stderr by the redirection policy.
    pub fn streams(mut self, streams: StdStreams) -> Self {
        self.streams = streams;
        self
    }

    pub fn map_backend<B2: MapBackend>(self, backend: B2) -> Driver<T, R, B2, I> {
        Driver {
            target: self.target,
            runtime: self.runtime,
            map: CoverageMap::with_backend(backend),
            config: self.config,
            streams: self.streams,
            input: self.input,
        }
    }

    /// Read persistent-mode inputs from `input` instead of fd 0.
    pub fn input<I2: Read>(self, input: I2) -> Driver<T, R, B, I2> {
        Driver {
            target: self.target,
            runtime: self.runtime,
            map: self.map,
            config: self.config,
            streams: self.streams,
            input,
        }
    }

    /// The work load-time constructors would otherwise do: settle deferred
    /// mode in the environment and put the placeholder map in place.
    fn startup(&mut self) -> Result<DeferredInit, HarnessError> {
        let deferred = DeferredInit::new(self.config.dont_defer);
        deferred.prepare()?;
        self.map.reserve(&mut self.runtime);
        Ok(deferred)
    }

    /// Run the whole driver. `args` is the full argument vector, program name first.
    pub fn run(mut self, mut args: Vec<OsString>) -> Result<RunSummary, HarnessError> {
        let mut deferred = self.startup()?;
        info!("dummy map is at {:p}", self.map.as_ptr());

        let program = args
            .first()
            .map_or_else(|| "driver".into(), |p| p.to_string_lossy().into_owned());
        print_banner(&program);

        let policy = self.config.redirection_policy();
        let diagnostics = StreamRedirector::new(self.streams).apply(&policy)?;
        if diagnostics.duplicated {
            logging::set_diagnostic_fd(diagnostics.fd);
            if !self.runtime.set_report_fd(diagnostics.fd) {
                debug!("no sanitizer report hook linked");
            }
        }

        let mut invoker = TargetInvoker::new(self.target);
        invoker.initialize(&mut args);
        // Do any other expensive one-time initialization before this point.

        let mode = RunMode::from_args(&args)?;
        match &mode {
            RunMode::BatchFile(paths) => {
                self.runtime.set_sharedmem_fuzzing(false);
                deferred.complete(&mut self.runtime, &mut self.map);

                let mut inputs: InputDispatcher<I> =
                    InputDispatcher::BatchIterating(BatchFiles::new(paths.clone()));
                loop {
                    match inputs.next_input() {
                        Pull::File(path, data) => {
                            println!("Reading {} bytes from {}", data.len(), path.display());
                            invoker.invoke(data);
                            println!("Execution successful.");
                        }
                        Pull::Input(data) => invoker.invoke(data),
                        Pull::Empty => {}
                        Pull::Exhausted => break,
                    }
                }
            }
            RunMode::PersistentLoop(budget) => {
                if self.config.disable_instrumentation {
                    info!("instrumentation disabled, keeping the placeholder map");
                } else {
                    deferred.complete(&mut self.runtime, &mut self.map);
                }
                info!("dummy map is now at {:p}", self.map.as_ptr());

                // Coverage from the target's lazy initialization lands here
                // instead of in the first real input.
                invoker.warm_up();

                let mut inputs = InputDispatcher::StreamReading(StreamInput::new(self.input));
                PersistentLoop::new(*budget).run(&mut self.runtime, &mut inputs, &mut invoker);
            }
        }

        println!("{program}: successfully executed input(s)");
        Ok(RunSummary {
            mode,
            executions: invoker.executions(),
            deferred_signaled: deferred.signaled(),
        })
    }
}

fn print_banner(program: &str) {
    println!(
        "======================= INFO =========================\n\
         This binary is built for afl++.\n\
         To run the target function on individual input(s) execute this:\n  \
         {program} INPUT_FILE1 [INPUT_FILE2 ... ]\n\
         To fuzz with afl-fuzz execute this:\n  \
         afl-fuzz [afl-flags] -- {program} [-N]\n\
         afl-fuzz will run N iterations before re-spawning the process (default: {})\n\
         ======================================================",
        i32::MAX
    );
}
