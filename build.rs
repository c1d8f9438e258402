//! Build script for marginr
//!
//! Compiles CUDA kernels to PTX when the cuda feature is enabled.

fn main() {
    #[cfg(feature = "cuda")]
    compile_cuda_kernels();
}

#[cfg(feature = "cuda")]
fn compile_cuda_kernels() {
    use std::env;
    use std::path::PathBuf;
    use std::process::Command;

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    // Kernel sets: (directory, filename, arch, required)
    // Optional kernels (required=false) warn on failure instead of panicking.
    let kernel_sets: Vec<(PathBuf, &str, &str, bool)> = vec![
        // Loss kernels
        (
            PathBuf::from("src/ops/cuda/kernels/loss"),
            "multi_margin.cu",
            "sm_75",
            true,
        ),
    ];

    let nvcc = find_nvcc().unwrap_or_else(|| {
        eprintln!();
        eprintln!("=== CUDA COMPILATION ERROR ===");
        eprintln!();
        eprintln!("Could not find nvcc (NVIDIA CUDA Compiler).");
        eprintln!("Install CUDA Toolkit: https://developer.nvidia.com/cuda-downloads");
        eprintln!();
        panic!("nvcc not found - CUDA Toolkit must be installed for the 'cuda' feature");
    });

    for (kernels_dir, kernel_file, arch, required) in &kernel_sets {
        let cu_path = kernels_dir.join(kernel_file);
        let ptx_name = kernel_file.replace(".cu", ".ptx");
        let ptx_path = out_dir.join(&ptx_name);

        println!("cargo:rerun-if-changed={}", cu_path.display());

        if !cu_path.exists() {
            panic!(
                "CUDA kernel source not found: {}\n\
                 Ensure kernel files exist in {}",
                cu_path.display(),
                kernels_dir.display()
            );
        }

        // Include paths: kernel's own dir + root kernels dir
        let include_arg = format!("-I{}", kernels_dir.display());
        let root_include_arg = "-Isrc/ops/cuda/kernels".to_string();
        let arch_arg = format!("-arch={}", arch);

        let output = Command::new(&nvcc)
            .args([
                "-ptx",
                "-O3",
                "--use_fast_math",
                &arch_arg,
                &include_arg,
                &root_include_arg,
                "-o",
                ptx_path.to_str().unwrap(),
                cu_path.to_str().unwrap(),
            ])
            .output();

        match output {
            Ok(output) => {
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    if *required {
                        eprintln!();
                        eprintln!("=== CUDA COMPILATION FAILED ===");
                        eprintln!("Failed to compile: {}", kernel_file);
                        if !stdout.is_empty() {
                            eprintln!("stdout: {}", stdout);
                        }
                        if !stderr.is_empty() {
                            eprintln!("stderr: {}", stderr);
                        }
                        panic!("nvcc compilation failed for {}", kernel_file);
                    } else {
                        eprintln!(
                            "cargo:warning=Optional kernel {} ({}) failed to compile: \
                             skipping (requires {} hardware). stderr: {}",
                            kernel_file,
                            arch,
                            arch.to_uppercase(),
                            stderr.lines().next().unwrap_or("unknown error")
                        );
                        // Write an empty PTX file so include_str! doesn't fail
                        std::fs::write(&ptx_path, "// Optional kernel not compiled\n")
                            .unwrap_or_else(|e| {
                                panic!("Failed to write placeholder PTX for {}: {}", kernel_file, e)
                            });
                    }
                }
            }
            Err(e) => {
                eprintln!();
                eprintln!("=== CUDA COMPILATION ERROR ===");
                eprintln!();
                eprintln!("Failed to execute nvcc for kernel '{}': {}", kernel_file, e);
                eprintln!("Install CUDA Toolkit: https://developer.nvidia.com/cuda-downloads");
                eprintln!();
                panic!("nvcc execution failed for {}: {}", kernel_file, e);
            }
        }
    }

    println!("cargo:rustc-env=CUDA_KERNEL_DIR={}", out_dir.display());
}

#[cfg(feature = "cuda")]
fn find_nvcc() -> Option<String> {
    use std::env;
    use std::path::PathBuf;
    use std::process::Command;

    if let Ok(cuda_path) = env::var("CUDA_PATH") {
        let nvcc = PathBuf::from(&cuda_path).join("bin").join("nvcc");
        if nvcc.exists() {
            return Some(nvcc.to_string_lossy().to_string());
        }
    }

    let common_paths = [
        "/usr/local/cuda/bin/nvcc",
        "/usr/local/cuda-12/bin/nvcc",
        "/opt/cuda/bin/nvcc",
    ];

    for path in common_paths {
        if std::path::Path::new(path).exists() {
            return Some(path.to_string());
        }
    }

    if Command::new("nvcc").arg("--version").output().is_ok() {
        return Some("nvcc".to_string());
    }

    None
}
