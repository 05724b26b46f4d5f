fn main() {
    let shim = concat!(env!("CARGO_MANIFEST_DIR"), "/src/weak_hooks.c");

    println!("cargo:rerun-if-changed={}", shim);

    cc::Build::new().file(shim).compile("aflpp_driver_hooks");
}
