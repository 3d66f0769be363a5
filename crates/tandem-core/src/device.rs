//! Device identity

use crate::db::LocalStore;
use crate::error::Result;
use crate::models::DeviceId;
use crate::util::normalize_text_option;

/// Settings key holding this installation's device id
pub const DEVICE_ID_SETTING: &str = "device_id";

/// Load the persisted device id, generating and storing one on first use
pub async fn load_or_create_device_id(store: &dyn LocalStore) -> Result<DeviceId> {
    if let Some(existing) = normalize_text_option(store.get_setting(DEVICE_ID_SETTING).await?) {
        return Ok(DeviceId::from(existing));
    }

    let device_id = DeviceId::generate();
    store
        .set_setting(DEVICE_ID_SETTING, device_id.as_str())
        .await?;
    tracing::info!(device_id = %device_id, "Generated device id");
    Ok(device_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryLocalStore;

    #[tokio::test]
    async fn device_id_is_stable_across_loads() {
        let store = MemoryLocalStore::new();
        let first = load_or_create_device_id(&store).await.unwrap();
        let second = load_or_create_device_id(&store).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            store.get_setting(DEVICE_ID_SETTING).await.unwrap().as_deref(),
            Some(first.as_str())
        );
    }

    #[tokio::test]
    async fn blank_setting_is_replaced() {
        let store = MemoryLocalStore::new();
        store.set_setting(DEVICE_ID_SETTING, "  ").await.unwrap();
        let device_id = load_or_create_device_id(&store).await.unwrap();
        assert!(!device_id.as_str().trim().is_empty());
    }
}
