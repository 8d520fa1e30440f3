//! Puts `memory.x` on the linker search path for the RP2040 firmware.
//!
//! Host builds (tests) ignore the script, since only the target-scoped flags in
//! `.cargo/config.toml` reference `link.x`.

use std::{env, fs::File, io::Write, path::PathBuf};

fn main() {
    let out = &PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR is set by cargo"));
    File::create(out.join("memory.x"))
        .and_then(|mut file| file.write_all(include_bytes!("memory.x")))
        .expect("unable to write memory.x to OUT_DIR");
    println!("cargo:rustc-link-search={}", out.display());
    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");
}
