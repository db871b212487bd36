use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=CUDA_PATH");

    // Only link the CUDA runtime when the accelerator backend is compiled in
    if env::var_os("CARGO_FEATURE_CUDA").is_none() {
        return;
    }

    let cuda_root = env::var("CUDA_PATH").unwrap_or_else(|_| "/usr/local/cuda".to_string());
    let lib_dir = PathBuf::from(&cuda_root).join("lib64");

    if !lib_dir.exists() {
        println!(
            "cargo:warning=CUDA libraries not found at {}. Set CUDA_PATH to the toolkit root.",
            lib_dir.display()
        );
    }

    println!("cargo:rustc-link-search=native={}", lib_dir.display());
    println!("cargo:rustc-link-lib=dylib=cudart");
}
