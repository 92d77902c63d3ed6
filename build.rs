use std::env;
use std::path::PathBuf;
use std::process::Command;

// Builds the native `solve_qeq` implementation used by the end-to-end tests
// as a real shared library, so the resolver exercises an actual dlopen.
fn main() {
    println!("cargo:rerun-if-changed=native/qeq.c");

    let family = env::var("CARGO_CFG_TARGET_FAMILY").unwrap_or_default();
    if family != "unix" {
        return;
    }

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let out_path = PathBuf::from(env::var("OUT_DIR").unwrap());
    let library = out_path.join("liboif_backend_c_qeq.so");

    let compiler = cc::Build::new()
        .opt_level(2)
        .flag_if_supported("-std=c99")
        .get_compiler();

    let mut cmd: Command = compiler.to_command();
    if target_os == "macos" {
        cmd.arg("-dynamiclib");
    } else {
        cmd.arg("-shared");
    }
    cmd.arg("-fPIC")
        .arg("-o")
        .arg(&library)
        .arg("native/qeq.c")
        .arg("-lm");

    let status = cmd.status().expect("failed to run the C compiler for native/qeq.c");
    if !status.success() {
        panic!("compiling native/qeq.c into {} failed", library.display());
    }

    println!("cargo:rustc-env=OIF_QEQ_LIBRARY={}", library.display());
}
