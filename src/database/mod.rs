// Storage: SQLite for job records, LanceDB for vector indexes

pub mod lancedb;
pub mod sqlite;

pub use self::lancedb::{IndexLocation, VectorIndexStore};
pub use sqlite::*;
