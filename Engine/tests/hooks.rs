use core::ffi::{c_char, c_int};
use std::ffi::OsString;

use aflpp_driver::{CTarget, Target, hooks};

/// Drops every argument after the program name.
#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn LLVMFuzzerInitialize(
    argc: *mut c_int,
    _argv: *mut *mut *mut c_char,
) -> c_int {
    unsafe { *argc = 1 };
    0
}

unsafe extern "C" fn noop_target(_data: *const u8, _size: usize) -> c_int {
    0
}

#[test]
fn statically_linked_initialize_is_found() {
    assert!(hooks::initialize_hook().is_some());
    assert!(hooks::report_fd_hook().is_none());
}

#[test]
fn linked_initialize_rewrites_arguments() {
    let mut target = CTarget::new(noop_target, hooks::initialize_hook());
    let mut args = vec![OsString::from("prog"), OsString::from("-runs=5")];

    target.initialize(&mut args);
    assert_eq!(args, vec![OsString::from("prog")]);
}
