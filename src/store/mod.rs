//! 存储层：记录存储抽象与实现（内存 / SQLite）

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{RecordStore, StoreError};
