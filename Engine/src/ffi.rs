/// C ABI surface for linking against an AFL++-instrumented target.
///
/// The final binary is `target.o + libaflpp_driver.a + afl-compiler-rt.o`.
use core::ffi::{CStr, c_char, c_int};
use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::sync::atomic::AtomicI32;

use log::info;

use crate::error::fatal;
use crate::targets::CTarget;
use crate::{AflRuntime, Driver, hooks, logging};

/// Inputs arrive on fd 0, never through shared memory.
#[allow(non_upper_case_globals)]
#[unsafe(no_mangle)]
pub static __afl_sharedmem_fuzzing: AtomicI32 = AtomicI32::new(0);

unsafe extern "C" {
    fn LLVMFuzzerTestOneInput(data: *const u8, size: usize) -> c_int;
}

/// Lets targets built against libFuzzer's custom-mutator API link.
#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub extern "C" fn LLVMFuzzerMutate(_data: *mut u8, _size: usize, _max_size: usize) -> usize {
    0
}

/// Process entry point for the linked fuzz target.
///
/// # Safety
/// `argv` must hold `argc` valid C strings, as handed over by the C runtime.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn main(argc: c_int, argv: *const *const c_char) -> c_int {
    logging::init();

    let args: Vec<OsString> = (0..usize::try_from(argc).unwrap_or(0))
        .map(|i| unsafe { *argv.add(i) })
        .take_while(|arg| !arg.is_null())
        .map(|arg| OsString::from_vec(unsafe { CStr::from_ptr(arg) }.to_bytes().to_vec()))
        .collect();

    let initialize = hooks::initialize_hook();
    if initialize.is_none() {
        info!("no LLVMFuzzerInitialize linked, skipping one-time setup");
    }
    let target = CTarget::new(LLVMFuzzerTestOneInput, initialize);

    match Driver::new(target, AflRuntime).run(args) {
        Ok(_) => 0,
        Err(err) => fatal(err),
    }
}
