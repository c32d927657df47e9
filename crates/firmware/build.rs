use anyhow::{Context, Result};
use springboard_config::{BufferSource, HarnessManifest, CODEBUF_ENV, MANIFEST_ENV};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let crate_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?);
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);

    let manifest_path = env::var_os(MANIFEST_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| crate_dir.join("harness.yaml"));
    let manifest = HarnessManifest::from_file(&manifest_path)?;
    let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));

    let code = match env::var_os(CODEBUF_ENV) {
        Some(path) => {
            println!("cargo:rerun-if-changed={}", Path::new(&path).display());
            fs::read(&path).with_context(|| format!("Failed to read code buffer at {:?}", path))?
        }
        None => {
            if let BufferSource::File(src) = &manifest.buffer.source {
                println!("cargo:rerun-if-changed={}", base_dir.join(&src.file).display());
            }
            manifest.buffer.source.load(base_dir)?
        }
    };
    manifest.check_buffer_fits(code.len())?;

    fs::write(out_dir.join("memory.x"), manifest.linker_script()?)?;
    fs::write(out_dir.join("codebuf.bin"), &code)?;
    fs::write(
        out_dir.join("harness_config.rs"),
        manifest.rust_constants(code.len())?,
    )?;

    println!("cargo:rustc-link-search={}", out_dir.display());
    if env::var("TARGET").map_or(false, |t| t.starts_with("thumb")) {
        println!("cargo:rustc-link-arg=-Tlink.x");
    }
    println!("cargo:rerun-if-changed={}", manifest_path.display());
    println!("cargo:rerun-if-env-changed={}", MANIFEST_ENV);
    println!("cargo:rerun-if-env-changed={}", CODEBUF_ENV);
    Ok(())
}
