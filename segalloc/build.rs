use std::env::{self, VarError};
use std::fs::File;
use std::io::Write;
use std::path::Path;

const DEFAULT_ARENA_BYTES: u32 = 1024 * 1024 * 32;
const SEGALLOC_ARENA_BYTES: &str = "SEGALLOC_ARENA_BYTES";

fn main() {
    create_arena_bytes_file();
    export_rerun_rules();
}

fn create_arena_bytes_file() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR environment variable not provided");
    let dest_path = Path::new(&out_dir).join("segalloc_arena_bytes.txt");
    let size: u32 = match env::var(SEGALLOC_ARENA_BYTES) {
        Ok(s) => s
            .parse()
            .expect("Could not interpret SEGALLOC_ARENA_BYTES as a 32 bit unsigned integer"),
        Err(VarError::NotPresent) => DEFAULT_ARENA_BYTES,
        Err(VarError::NotUnicode(_)) => panic!(
            "Could not interpret SEGALLOC_ARENA_BYTES as a string representing a 32 bit unsigned integer"
        ),
    };
    let mut f = File::create(&dest_path).expect("Could not create file to store the segalloc arena size.");
    write!(f, "{}", size).expect("Could not write the segalloc arena size");
    f.flush().expect("Could not flush the segalloc arena size file");
}

fn export_rerun_rules() {
    println!("cargo:rerun-if-env-changed={}", SEGALLOC_ARENA_BYTES);
    for path in ["./Cargo.toml", "./build.rs", "./src/lib.rs", "./src/imp_static_array.rs"].iter() {
        println!("cargo:rerun-if-changed={}", path);
    }
}
