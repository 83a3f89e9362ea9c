//! Persistent application state

mod database;

pub use database::{IndexError, RecordingsIndex};
