pub mod raw;

pub use raw::{read_raw_dump, spawn_raw_dump, write_raw_dump, RawDumpPaths};
