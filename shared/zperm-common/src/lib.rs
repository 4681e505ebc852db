//! `zPerm` Common Library
//!
//! Shared permission model and dump records used by the server and by tools
//! that read or write dump files.

pub mod dump;
pub mod types;

pub use dump::{parse_dump, DumpRecord, ParseDumpError};
pub use types::*;
