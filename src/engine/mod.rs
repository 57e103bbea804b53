//! Engine module for core operations: store, change detection, OCR capabilities, CLI plumbing.

pub mod arg_parser;
pub mod capability;
pub mod change;
pub mod db_ops;
pub mod handlers;
pub mod hashing;
pub mod progress;
pub mod tesseract;
pub mod tools;

// Re-export commonly used functions
pub use arg_parser::{Cli, Commands};
pub use change::{ChangePolicy, classify, decide};
pub use db_ops::{load_index, open_db, open_db_in_memory, open_reader, search};
pub use handlers::handle_run;
pub use hashing::{hash_file, hash_matches};
pub use tools::{mtime_changed, path_relative_to};
