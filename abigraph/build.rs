//! requirements for the DWARF fixture tests:
//!
//! * C compiler that understands `-gdwarf-4` and `-gdwarf-5` (gcc, clang)
//! * make
//!
//! for linux
//!
//! `sudo apt install build-essential`
//!
use std::path::PathBuf;
use std::process::Command;

fn main() {
    // rerun build if the fixture library sources change.
    println!("cargo:rerun-if-changed=../test_c/abilib.h");
    println!("cargo:rerun-if-changed=../test_c/unit_a.c");
    println!("cargo:rerun-if-changed=../test_c/unit_b.c");
    println!("cargo:rerun-if-changed=../test_c/makefile");

    let test_c = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../test_c");

    // build the fixture libraries. a missing toolchain only fails the tests
    // that load them, not the crate.
    match Command::new("make").current_dir(&test_c).status() {
        Ok(status) if status.success() => {}
        Ok(_) => {
            println!("cargo:warning=failed to compile the test C libraries, DWARF fixture tests will fail");
        }
        Err(_) => {
            println!("cargo:warning=make not found, DWARF fixture tests will fail");
        }
    }
}
