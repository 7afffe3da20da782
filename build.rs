//! Build script: embeds the git hash and checks for the native decoder library.
//!
//! The `pocketsphinx` feature links against libpocketsphinx and libsphinxbase.
//! A missing library otherwise surfaces as an opaque linker error deep inside
//! pocketsphinx-sys, so we check up front and print install instructions.

use std::path::Path;
use std::process::Command;

fn main() {
    // Embed git short hash for version string
    if let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        && output.status.success()
    {
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        println!("cargo:rustc-env=GIT_HASH={}", hash);
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");

    if cfg!(feature = "pocketsphinx") {
        check_pocketsphinx();
    }
}

fn check_pocketsphinx() {
    let pkg_config_ok = Command::new("pkg-config")
        .args(["--exists", "pocketsphinx"])
        .status()
        .is_ok_and(|s| s.success());

    if !pkg_config_ok && !shared_library_exists("libpocketsphinx.so") {
        panic!(
            "\n\n\
            ╔══════════════════════════════════════════════════════════╗\n\
            ║  pocketsphinx not found.                                 ║\n\
            ║                                                          ║\n\
            ║  Install: sudo apt install libpocketsphinx-dev           ║\n\
            ║  Or build without it: cargo build --release              ║\n\
            ╚══════════════════════════════════════════════════════════╝\n",
        );
    }
    println!("cargo::warning=pocketsphinx detected");
}

fn shared_library_exists(name: &str) -> bool {
    ["/usr/lib/x86_64-linux-gnu", "/usr/lib/aarch64-linux-gnu", "/usr/lib", "/usr/lib64", "/usr/local/lib"]
        .iter()
        .any(|dir| Path::new(dir).join(name).exists())
}
