pub mod alerts;
pub mod keyed;
pub mod persistence;
pub mod postgres;

pub use alerts::{AlertPublisher, FileNotifier, LogNotifier, Notifier};
pub use keyed::{KeyedStore, MemoryKeyedStore};
pub use persistence::RecordWriter;
pub use postgres::PostgresKeyedStore;
