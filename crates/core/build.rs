use std::env;

fn main() {
    println!("cargo:rustc-check-cfg=cfg(thumb)");
    println!("cargo:rerun-if-env-changed=TARGET");

    // Thumb targets enter code through an interworking address (bit 0 set).
    let target = env::var("TARGET").unwrap_or_default();
    if target.starts_with("thumb") {
        println!("cargo:rustc-cfg=thumb");
    }
}
