/// Optional C symbols, bound through weak references at link time.
///
/// A static link of `target.o` against this library resolves them without
/// any dynamic symbol table.
use core::ffi::c_void;

use crate::targets::CInitializeFn;

/// `__sanitizer_set_report_fd`: the descriptor travels in a pointer.
pub type SetReportFdFn = unsafe extern "C" fn(*mut c_void);

unsafe extern "C" {
    fn aflpp_driver_initialize_hook() -> *mut c_void;
    fn aflpp_driver_report_fd_hook() -> *mut c_void;
}

/// The target's `LLVMFuzzerInitialize`, if it defines one.
pub fn initialize_hook() -> Option<CInitializeFn> {
    let sym = unsafe { aflpp_driver_initialize_hook() };
    (!sym.is_null()).then(|| unsafe { core::mem::transmute::<*mut c_void, CInitializeFn>(sym) })
}

/// The sanitizer runtime's report redirection, if one is linked.
pub fn report_fd_hook() -> Option<SetReportFdFn> {
    let sym = unsafe { aflpp_driver_report_fd_hook() };
    (!sym.is_null()).then(|| unsafe { core::mem::transmute::<*mut c_void, SetReportFdFn>(sym) })
}
