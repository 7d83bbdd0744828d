//! Disposable read model storage abstractions.

pub mod row_store;

pub use row_store::{InMemoryRowStore, RowStore, RowStoreError};
