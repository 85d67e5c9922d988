pub mod models;
pub mod queries;
pub mod sqlite;

pub use queries::NewEntry;
pub use sqlite::Database;
