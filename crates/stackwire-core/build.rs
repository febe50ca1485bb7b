//! Build script for stackwire-core
//!
//! Checks system requirements before compilation:
//! - Minimum Rust version
//! - Whether remote unwinding is available on the target
//!
//! ## Requirements
//!
//! - **Rust**: 1.77.0 or newer
//! - **Remote unwinding**: Linux on x86-64 (ptrace register layout)

fn main()
{
    println!("cargo:rerun-if-changed=build.rs");

    // C string literals need 1.77
    match rustc_version::version() {
        Ok(version) => {
            let minimum = rustc_version::Version::new(1, 77, 0);
            assert!(
                version >= minimum,
                "stackwire-core requires Rust {minimum} or newer, found {version}"
            );
        }
        Err(_) => println!("cargo:warning=could not verify Rust version"),
    }

    // Build scripts run on the host, so the target has to come from the environment
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();

    if target_os != "linux" {
        println!("cargo:warning=stackwire-core: remote unwinding is Linux only");
    } else if target_arch != "x86_64" {
        println!("cargo:warning=stackwire-core: remote unwinding is not available on {target_arch}");
    }
}
