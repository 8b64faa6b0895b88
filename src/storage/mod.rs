//! Durable whole-file JSON persistence

mod atomic;

pub use atomic::{atomic_save, load, StorageError};
