fn main() {
    // Reported in the CLI's long version string.
    match rustc_version::version() {
        Ok(version) => println!("cargo:rustc-env=RUSTC_VERSION={version}"),
        Err(_) => println!("cargo:rustc-env=RUSTC_VERSION=unknown"),
    }
    println!("cargo:rerun-if-changed=build.rs");
}
