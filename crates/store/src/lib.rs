//! Durable storage for tasks and the device inventory snapshot. Every
//! status-changing method on `TaskStore` is a single SQL
//! `UPDATE ... WHERE id = ? AND status = ?`, so it either applies once or
//! not at all — that's the whole of the CAS contract callers rely on.

mod error;
mod sqlite;
mod traits;

pub use error::{Result, StoreError};
pub use sqlite::SqliteStore;
pub use traits::{DeviceStore, TaskStore};
