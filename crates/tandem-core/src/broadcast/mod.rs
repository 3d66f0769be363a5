//! Broadcast store contract
//!
//! The broadcast store is the shared medium between devices: a plain
//! key-value store with list primitives, used both for record snapshots and
//! as a polled change bus.

mod memory;
mod rest;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryBroadcastStore;
pub use rest::RestBroadcastStore;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Broadcast store unreachable: {0}")]
    Unreachable(String),
    #[error("Broadcast HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Broadcast API error: {0}")]
    Api(String),
    #[error("Invalid broadcast configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Invalid broadcast payload: {0}")]
    InvalidPayload(String),
}

pub type BroadcastResult<T> = Result<T, BroadcastError>;

/// Remote key-value + list store.
///
/// List indexes follow Redis semantics: inclusive bounds, negative values
/// count from the tail (`-1` is the last element).
#[async_trait]
pub trait BroadcastStore: Send + Sync {
    async fn get(&self, key: &str) -> BroadcastResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> BroadcastResult<()>;

    /// All keys starting with `prefix`
    async fn keys(&self, prefix: &str) -> BroadcastResult<Vec<String>>;

    async fn del(&self, key: &str) -> BroadcastResult<()>;

    /// Append `value` to the tail of the list at `key`
    async fn list_push(&self, key: &str, value: &str) -> BroadcastResult<()>;

    async fn list_range(&self, key: &str, start: i64, end: i64) -> BroadcastResult<Vec<String>>;

    /// Keep only the elements in `start..=end`
    async fn list_trim(&self, key: &str, start: i64, end: i64) -> BroadcastResult<()>;

    async fn expire(&self, key: &str, seconds: u64) -> BroadcastResult<()>;
}

/// Resolve Redis-style inclusive, possibly negative bounds against `len`.
///
/// Returns `None` when the range selects nothing.
pub(crate) fn resolve_range(start: i64, end: i64, len: usize) -> Option<(usize, usize)> {
    let len = i64::try_from(len).ok()?;
    if len == 0 {
        return None;
    }
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };
    if start > end || start >= len {
        return None;
    }
    Some((usize::try_from(start).ok()?, usize::try_from(end).ok()?))
}
