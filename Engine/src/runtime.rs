/// The engine-side runtime the driver talks to.
///
/// In a real build these are the AFL++ compiler runtime's symbols. The driver
/// never owns their behavior: `manual_init` may turn this process into a
/// forkserver, and `persistent_loop` may stop the process from outside.
use std::os::fd::RawFd;

pub trait Runtime {
    /// Seed the global coverage pointer with the placeholder map.
    fn publish_area(&mut self, area: *mut u8);

    /// Clear the global coverage pointer if it still holds `area`.
    fn retract_area(&mut self, area: *mut u8);

    /// Whether inputs arrive through shared memory instead of fd 0.
    fn set_sharedmem_fuzzing(&mut self, enabled: bool);

    /// Signal that deferred initialization is complete.
    fn manual_init(&mut self);

    /// Ask whether another persistent iteration should run.
    fn persistent_loop(&mut self, budget: u32) -> bool;

    /// Point a linked diagnostics subsystem at `fd`. Returns `false` when no
    /// such subsystem is linked.
    fn set_report_fd(&mut self, _fd: RawFd) -> bool {
        false
    }
}

/// Runtime for running without a forkserver.
///
/// The loop primitive grants exactly `budget` iterations, the budget being
/// taken from the first call.
#[derive(Debug, Default)]
pub struct StandaloneRuntime {
    area: Option<usize>,
    remaining: Option<u32>,
    initialized: bool,
    sharedmem_fuzzing: bool,
}

impl StandaloneRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn area(&self) -> Option<*mut u8> {
        self.area.map(|addr| addr as *mut u8)
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    pub fn sharedmem_fuzzing(&self) -> bool {
        self.sharedmem_fuzzing
    }
}

impl Runtime for StandaloneRuntime {
    fn publish_area(&mut self, area: *mut u8) {
        self.area = Some(area as usize);
    }

    fn retract_area(&mut self, area: *mut u8) {
        if self.area == Some(area as usize) {
            self.area = None;
        }
    }

    fn set_sharedmem_fuzzing(&mut self, enabled: bool) {
        self.sharedmem_fuzzing = enabled;
    }

    fn manual_init(&mut self) {
        self.initialized = true;
    }

    fn persistent_loop(&mut self, budget: u32) -> bool {
        let remaining = self.remaining.get_or_insert(budget);
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        true
    }
}

#[cfg(feature = "afl")]
pub use afl::AflRuntime;

#[cfg(feature = "afl")]
mod afl {
    use core::ffi::{c_int, c_uint, c_void};
    use std::os::fd::RawFd;
    use std::sync::atomic::Ordering;

    use super::Runtime;

    unsafe extern "C" {
        static mut __afl_area_ptr: *mut u8;
        fn __afl_manual_init();
        fn __afl_persistent_loop(max_cnt: c_uint) -> c_int;
    }

    /// The AFL++ compiler runtime linked into the final binary.
    #[derive(Debug, Default)]
    pub struct AflRuntime;

    impl Runtime for AflRuntime {
        fn publish_area(&mut self, area: *mut u8) {
            unsafe { __afl_area_ptr = area };
        }

        fn retract_area(&mut self, area: *mut u8) {
            unsafe {
                if __afl_area_ptr == area {
                    __afl_area_ptr = core::ptr::null_mut();
                }
            }
        }

        fn set_sharedmem_fuzzing(&mut self, enabled: bool) {
            crate::ffi::__afl_sharedmem_fuzzing.store(c_int::from(enabled), Ordering::SeqCst);
        }

        fn manual_init(&mut self) {
            unsafe { __afl_manual_init() };
        }

        fn persistent_loop(&mut self, budget: u32) -> bool {
            unsafe { __afl_persistent_loop(budget) != 0 }
        }

        fn set_report_fd(&mut self, fd: RawFd) -> bool {
            let Some(set_report_fd) = crate::hooks::report_fd_hook() else {
                return false;
            };
            // The sanitizer runtime takes the descriptor smuggled in a pointer.
            unsafe { set_report_fd(fd as isize as *mut c_void) };
            true
        }
    }
}
