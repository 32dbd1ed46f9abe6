fn main() {
    // Host builds of the library and its tests use the system linker.
    if std::env::var_os("CARGO_FEATURE_FIRMWARE").is_some() {
        println!("cargo:rustc-link-arg=-Tlinkall.x");
    }
}
