use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tandem_core::broadcast::{BroadcastStore, MemoryBroadcastStore, RestBroadcastStore};
use tandem_core::db::{LocalStore, SqliteLocalStore};
use tandem_core::{
    load_or_create_device_id, Conversation, DeviceId, Message, Reconciler, RecordId, RecordType,
    Replica, SyncConflict, SyncRecord,
};

use crate::config_profiles::{CliProfilesConfig, ResolvedProfile};
use crate::error::CliError;

const SHORT_ID_LEN: usize = 13;
const CONFLICT_SCAN_LIMIT: usize = 1_000;

/// Everything a command needs: the local replica and the engine wired to
/// the configured broadcast backend
pub struct AppContext {
    pub profile: ResolvedProfile,
    pub db_path: PathBuf,
    pub store: Arc<SqliteLocalStore>,
    pub device_id: DeviceId,
    pub backend: String,
    pub reconciler: Arc<Reconciler>,
}

impl AppContext {
    pub fn replica(&self) -> Replica {
        Replica::new(self.store.clone(), self.device_id.clone())
    }
}

#[derive(Debug, Serialize)]
pub struct ConversationListItem {
    pub id: String,
    pub title: String,
    pub version: u64,
    pub sync_status: String,
    pub last_modified: i64,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct MessageItem {
    pub id: String,
    pub role: String,
    pub content: String,
    pub version: u64,
    pub sync_status: String,
    pub last_modified: i64,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: String,
    pub record_type: String,
    pub record_id: String,
    pub local_version: u64,
    pub remote_version: u64,
    pub detected_at: i64,
    pub detected_at_iso: String,
    pub resolved: bool,
    pub strategy: Option<String>,
}

pub async fn open_context(
    cli_db_path: Option<PathBuf>,
    profile: Option<&str>,
) -> Result<AppContext, CliError> {
    let profiles = CliProfilesConfig::load().map_err(CliError::Config)?;
    let resolved = profiles.resolve(profile).map_err(CliError::Config)?;
    let db_path = resolve_db_path(cli_db_path, &resolved);
    let remote = open_broadcast_store(&resolved)?;
    open_context_with(&db_path, resolved, remote).await
}

pub async fn open_context_with(
    db_path: &Path,
    profile: ResolvedProfile,
    remote: (Arc<dyn BroadcastStore>, String),
) -> Result<AppContext, CliError> {
    let store = Arc::new(SqliteLocalStore::open(db_path)?);
    let device_id = load_or_create_device_id(store.as_ref()).await?;
    let (remote, backend) = remote;
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        remote,
        profile.sync.clone(),
        device_id.clone(),
    ));
    tracing::debug!(
        db_path = %db_path.display(),
        device_id = %device_id,
        backend = %backend,
        "Opened replica"
    );

    Ok(AppContext {
        profile,
        db_path: db_path.to_path_buf(),
        store,
        device_id,
        backend,
        reconciler,
    })
}

/// Broadcast store for a profile along with a label describing it
pub fn open_broadcast_store(
    profile: &ResolvedProfile,
) -> Result<(Arc<dyn BroadcastStore>, String), CliError> {
    let Some(url) = profile.redis_rest_url.as_deref() else {
        tracing::info!("No Redis REST endpoint configured; changes stay on this device");
        return Ok((Arc::new(MemoryBroadcastStore::new()), "memory".to_string()));
    };
    let token = profile
        .redis_rest_token
        .as_deref()
        .ok_or_else(|| CliError::MissingToken(url.to_string()))?;
    let store = RestBroadcastStore::new(url, token)?;
    let label = store.endpoint().to_string();
    Ok((Arc::new(store), label))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>, profile: &ResolvedProfile) -> PathBuf {
    cli_db_path
        .or_else(|| profile.db_path.clone())
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tandem")
        .join("tandem.db")
}

/// Find a live record by full id or unique id prefix
pub async fn resolve_record(
    query: &str,
    record_type: RecordType,
    store: &dyn LocalStore,
) -> Result<SyncRecord, CliError> {
    let query = normalize_identifier(query)?;
    if let Ok(id) = query.parse::<RecordId>() {
        if let Some(record) = store.get(record_type, &id).await? {
            if !record.deleted {
                return Ok(record);
            }
        }
    }

    let mut matches = store
        .list(record_type, false)
        .await?
        .into_iter()
        .filter(|record| record.id.as_str().starts_with(&query))
        .collect::<Vec<_>>();

    match matches.len() {
        0 => Err(CliError::NotFound(record_type.as_str(), query)),
        1 => Ok(matches.remove(0)),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|record| short_id(record.id.as_str()))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

/// Find a conflict by full id or unique id prefix
pub async fn resolve_conflict_id(
    query: &str,
    store: &dyn LocalStore,
) -> Result<SyncConflict, CliError> {
    let query = normalize_identifier(query)?;
    if let Some(conflict) = store.get_conflict(&query).await? {
        return Ok(conflict);
    }

    let mut matches = store
        .list_conflicts(CONFLICT_SCAN_LIMIT, true)
        .await?
        .into_iter()
        .filter(|conflict| conflict.id.starts_with(&query))
        .collect::<Vec<_>>();

    match matches.len() {
        0 => Err(CliError::NotFound("conflict", query)),
        1 => Ok(matches.remove(0)),
        _ => Err(CliError::AmbiguousId(format!(
            "Conflict prefix '{query}' is ambiguous"
        ))),
    }
}

pub fn conversation_title(record: &SyncRecord) -> String {
    record
        .content::<Conversation>()
        .map(|conversation| conversation.title_preview(40))
        .unwrap_or_default()
}

pub fn format_conversation_lines(records: &[SyncRecord]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let short_id = short_id(record.id.as_str());
            let title = conversation_title(record);
            let relative_time = format_relative_time(record.last_modified, now_ms);
            format!(
                "{short_id:<13}  {title:<40}  {relative_time:<10}  {}",
                record.sync_status
            )
        })
        .collect()
}

pub fn conversation_to_list_item(record: &SyncRecord) -> ConversationListItem {
    let now_ms = Utc::now().timestamp_millis();
    ConversationListItem {
        id: record.id.to_string(),
        title: conversation_title(record),
        version: record.version,
        sync_status: record.sync_status.to_string(),
        last_modified: record.last_modified,
        relative_time: format_relative_time(record.last_modified, now_ms),
    }
}

pub fn message_to_item(record: &SyncRecord) -> Result<MessageItem, CliError> {
    let message = record.content::<Message>()?;
    Ok(MessageItem {
        id: record.id.to_string(),
        role: message.role.to_string(),
        content: message.content,
        version: record.version,
        sync_status: record.sync_status.to_string(),
        last_modified: record.last_modified,
    })
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id.clone(),
        record_type: conflict.record_type.to_string(),
        record_id: conflict.record_id.to_string(),
        local_version: conflict.local_version,
        remote_version: conflict.remote_version,
        detected_at: conflict.timestamp,
        detected_at_iso: format_sync_timestamp(conflict.timestamp),
        resolved: conflict.resolved,
        strategy: conflict.resolution_used.map(|strategy| strategy.to_string()),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let state = conflict
                .resolution_used
                .map_or_else(|| "open".to_string(), |strategy| strategy.to_string());
            format!(
                "{}  {:<12}  {}  local=v{} remote=v{}  {}  {}",
                short_id(&conflict.id),
                conflict.record_type,
                short_id(conflict.record_id.as_str()),
                conflict.local_version,
                conflict.remote_version,
                format_sync_timestamp(conflict.timestamp),
                state
            )
        })
        .collect()
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyIdentifier)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Join positional words, falling back to piped stdin
pub fn read_content(words: &[String]) -> Result<Option<String>, CliError> {
    if !words.is_empty() {
        return Ok(normalize_content(&words.join(" ")));
    }

    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }
    let mut buffer = String::new();
    stdin.read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}
