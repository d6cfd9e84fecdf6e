pub mod memory;
pub mod sqlite;

pub use memory::MemoryDeckStore;
pub use sqlite::SqliteDeckStore;
