//! In-memory broadcast store

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{resolve_range, BroadcastError, BroadcastResult, BroadcastStore};

#[derive(Debug, Default)]
struct MemoryState {
    strings: BTreeMap<String, String>,
    lists: BTreeMap<String, Vec<String>>,
    ttls: HashMap<String, u64>,
}

/// Process-local stand-in for the networked store.
///
/// Clones share the same state, so several replicas in one process can
/// reconcile against each other. TTLs are recorded but never enforced.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroadcastStore {
    state: Arc<Mutex<MemoryState>>,
    unreachable: Arc<AtomicBool>,
}

impl MemoryBroadcastStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail as if the backend were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// TTL last requested for `key`, if any
    pub async fn ttl(&self, key: &str) -> Option<u64> {
        self.state.lock().await.ttls.get(key).copied()
    }

    fn check_reachable(&self) -> BroadcastResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(BroadcastError::Unreachable(
                "in-memory store switched off".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BroadcastStore for MemoryBroadcastStore {
    async fn get(&self, key: &str) -> BroadcastResult<Option<String>> {
        self.check_reachable()?;
        Ok(self.state.lock().await.strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> BroadcastResult<()> {
        self.check_reachable()?;
        let mut state = self.state.lock().await;
        state.lists.remove(key);
        state.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> BroadcastResult<Vec<String>> {
        self.check_reachable()?;
        let state = self.state.lock().await;
        let mut keys = state
            .strings
            .keys()
            .chain(state.lists.keys())
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect::<Vec<_>>();
        keys.sort();
        Ok(keys)
    }

    async fn del(&self, key: &str) -> BroadcastResult<()> {
        self.check_reachable()?;
        let mut state = self.state.lock().await;
        state.strings.remove(key);
        state.lists.remove(key);
        state.ttls.remove(key);
        Ok(())
    }

    async fn list_push(&self, key: &str, value: &str) -> BroadcastResult<()> {
        self.check_reachable()?;
        let mut state = self.state.lock().await;
        if state.strings.contains_key(key) {
            return Err(BroadcastError::Api(format!(
                "WRONGTYPE key '{key}' holds a string"
            )));
        }
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    async fn list_range(&self, key: &str, start: i64, end: i64) -> BroadcastResult<Vec<String>> {
        self.check_reachable()?;
        let state = self.state.lock().await;
        let Some(list) = state.lists.get(key) else {
            return Ok(Vec::new());
        };
        Ok(resolve_range(start, end, list.len())
            .map(|(from, to)| list[from..=to].to_vec())
            .unwrap_or_default())
    }

    async fn list_trim(&self, key: &str, start: i64, end: i64) -> BroadcastResult<()> {
        self.check_reachable()?;
        let mut state = self.state.lock().await;
        let Some(len) = state.lists.get(key).map(Vec::len) else {
            return Ok(());
        };
        match resolve_range(start, end, len) {
            Some((from, to)) => {
                if let Some(list) = state.lists.get_mut(key) {
                    list.truncate(to + 1);
                    list.drain(..from);
                }
            }
            None => {
                state.lists.remove(key);
            }
        }
        Ok(())
    }

    async fn expire(&self, key: &str, seconds: u64) -> BroadcastResult<()> {
        self.check_reachable()?;
        let mut state = self.state.lock().await;
        if state.strings.contains_key(key) || state.lists.contains_key(key) {
            state.ttls.insert(key.to_string(), seconds);
        }
        Ok(())
    }
}
