use core::ffi::{c_char, c_int};
use std::ffi::{CStr, CString, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};

use log::info;

/// libFuzzer-style entry point: receives a pointer to input data and its length.
pub type CTargetFn = unsafe extern "C" fn(*const u8, usize) -> c_int;

/// Optional one-time setup hook, may rewrite `argc`/`argv`.
pub type CInitializeFn = unsafe extern "C" fn(*mut c_int, *mut *mut *mut c_char) -> c_int;

/// Payload of the warm-up call. Deterministic and one byte long.
pub const WARMUP_INPUT: [u8; 1] = [b'#'];

/// The code under test.
pub trait Target {
    /// Expensive setup, run once before any input.
    fn initialize(&mut self, _args: &mut Vec<OsString>) {}

    /// Run one input. The return value is not interpreted.
    fn test_one_input(&mut self, data: &[u8]) -> i32;
}

impl<F> Target for F
where
    F: FnMut(&[u8]) -> i32,
{
    fn test_one_input(&mut self, data: &[u8]) -> i32 {
        self(data)
    }
}

/// A target linked in through the C ABI.
#[derive(Debug, Clone, Copy)]
pub struct CTarget {
    test_one_input: CTargetFn,
    initialize: Option<CInitializeFn>,
}

impl CTarget {
    pub fn new(test_one_input: CTargetFn, initialize: Option<CInitializeFn>) -> Self {
        Self {
            test_one_input,
            initialize,
        }
    }
}

impl Target for CTarget {
    fn initialize(&mut self, args: &mut Vec<OsString>) {
        let Some(initialize) = self.initialize else {
            return;
        };

        // Arguments with interior NULs cannot be represented in argv and are dropped.
        let owned: Vec<CString> = args
            .iter()
            .filter_map(|arg| CString::new(arg.as_bytes()).ok())
            .collect();
        let mut argv: Vec<*mut c_char> = owned.iter().map(|arg| arg.as_ptr().cast_mut()).collect();
        argv.push(core::ptr::null_mut());

        let mut argc = c_int::try_from(owned.len()).unwrap_or(c_int::MAX);
        let mut argv_ptr = argv.as_mut_ptr();

        info!("Running LLVMFuzzerInitialize ...");
        unsafe { initialize(&mut argc, &mut argv_ptr) };
        info!("continue...");

        // The hook may hand back a different vector; copy whatever it left us.
        let argc = usize::try_from(argc).unwrap_or(0);
        *args = (0..argc)
            .map(|i| unsafe { *argv_ptr.add(i) })
            .take_while(|arg| !arg.is_null())
            .map(|arg| OsString::from_vec(unsafe { CStr::from_ptr(arg) }.to_bytes().to_vec()))
            .collect();
    }

    fn test_one_input(&mut self, data: &[u8]) -> i32 {
        unsafe { (self.test_one_input)(data.as_ptr(), data.len()) }
    }
}

/// The single call boundary into the target.
#[derive(Debug)]
pub struct TargetInvoker<T> {
    target: T,
    warmed_up: bool,
    executions: u64,
}

impl<T: Target> TargetInvoker<T> {
    pub fn new(target: T) -> Self {
        Self {
            target,
            warmed_up: false,
            executions: 0,
        }
    }

    pub fn initialize(&mut self, args: &mut Vec<OsString>) {
        self.target.initialize(args);
    }

    /// Absorb the coverage of the target's lazy initialization. Runs at most once.
    pub fn warm_up(&mut self) -> bool {
        if self.warmed_up {
            return false;
        }
        self.warmed_up = true;
        self.target.test_one_input(&WARMUP_INPUT);
        true
    }

    pub fn invoke(&mut self, data: &[u8]) {
        let _ = self.target.test_one_input(data);
        self.executions += 1;
    }

    /// Number of real (non warm-up) invocations so far.
    pub fn executions(&self) -> u64 {
        self.executions
    }

    pub fn target(&self) -> &T {
        &self.target
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    static SEEN: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());

    unsafe extern "C" fn recording_target(data: *const u8, size: usize) -> c_int {
        let input = unsafe { std::slice::from_raw_parts(data, size) }.to_vec();
        SEEN.lock().unwrap().push(input);
        0
    }

    unsafe extern "C" fn dropping_initialize(
        argc: *mut c_int,
        argv: *mut *mut *mut c_char,
    ) -> c_int {
        // Drop the first real argument by shifting argv.
        unsafe {
            let args = *argv;
            *args.add(1) = *args.add(0);
            *argv = args.add(1);
            *argc -= 1;
        }
        0
    }

    #[test]
    fn c_target_receives_exact_bytes() {
        let mut target = CTarget::new(recording_target, None);
        target.test_one_input(b"HI!");
        assert!(SEEN.lock().unwrap().iter().any(|seen| seen == b"HI!"));
    }

    #[test]
    fn initialize_can_rewrite_arguments() {
        let mut target = CTarget::new(recording_target, Some(dropping_initialize));
        let mut args = vec![
            OsString::from("prog"),
            OsString::from("-runs=10"),
            OsString::from("-50"),
        ];

        target.initialize(&mut args);
        assert_eq!(args, vec![OsString::from("prog"), OsString::from("-50")]);
    }

    #[test]
    fn initialize_without_hook_leaves_arguments() {
        let mut target = CTarget::new(recording_target, None);
        let mut args = vec![OsString::from("prog")];
        target.initialize(&mut args);
        assert_eq!(args, vec![OsString::from("prog")]);
    }

    #[test]
    fn warm_up_runs_once_with_one_byte() {
        let mut calls: Vec<Vec<u8>> = Vec::new();
        let mut invoker = TargetInvoker::new(|data: &[u8]| {
            calls.push(data.to_vec());
            0
        });

        assert!(invoker.warm_up());
        assert!(!invoker.warm_up());
        invoker.invoke(b"abc");
        assert_eq!(invoker.executions(), 1);
        drop(invoker);

        assert_eq!(calls, vec![WARMUP_INPUT.to_vec(), b"abc".to_vec()]);
    }

    #[test]
    fn return_value_is_ignored() {
        let mut invoker = TargetInvoker::new(|_: &[u8]| -1);
        invoker.invoke(b"x");
        invoker.invoke(b"y");
        assert_eq!(invoker.executions(), 2);
    }
}
