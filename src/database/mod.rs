// Database module
// SQLite holds the per-document cache, LanceDB holds the vectors

pub mod lancedb;
pub mod sqlite;

pub use sqlite::*;
