//! Local store layer for Tandem

mod memory;
mod migrations;
mod repository;
mod sqlite;

pub use memory::MemoryLocalStore;
pub use repository::{LocalStore, RecordPredicate};
pub use sqlite::SqliteLocalStore;

#[cfg(test)]
mod contract_tests;
