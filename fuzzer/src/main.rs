//! Demo target for the driver, runnable without a forkserver.
//!
//! `fuzzer seed1 seed2` replays files once; `printf 'HI!' | fuzzer -1`
//! exercises the persistent path and aborts on the planted bug.
use aflpp_driver::error::fatal;
use aflpp_driver::{Driver, StandaloneRuntime, logging};

fn test_one_input(data: &[u8]) -> i32 {
    if data.starts_with(b"HI!") {
        log::error!("planted bug reached");
        std::process::abort();
    }
    0
}

fn main() {
    logging::init();

    let driver = Driver::new(test_one_input, StandaloneRuntime::new());
    if let Err(err) = driver.run(std::env::args_os().collect()) {
        fatal(err);
    }
}
