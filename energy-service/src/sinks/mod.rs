pub mod sqlite;

pub use sqlite::SqliteReadingsSink;
