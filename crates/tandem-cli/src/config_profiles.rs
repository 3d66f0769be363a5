//! Persistent CLI profile configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tandem_core::util::{is_http_url, normalize_text_option};
use tandem_core::{ConflictStrategy, SyncConfig};

const CONFIG_FILE_NAME: &str = "cli-config.json";

pub const ENV_PROFILE: &str = "TANDEM_PROFILE";
pub const ENV_NAMESPACE: &str = "TANDEM_NAMESPACE";
pub const ENV_STRATEGY: &str = "TANDEM_STRATEGY";
pub const ENV_REDIS_REST_URL: &str = "TANDEM_REDIS_REST_URL";
pub const ENV_REDIS_REST_TOKEN: &str = "TANDEM_REDIS_REST_TOKEN";
pub const ENV_DB_PATH: &str = "TANDEM_DB_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfilesConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, CliProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfile {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub strategy: Option<ConflictStrategy>,
    #[serde(default)]
    pub strict_content_check: Option<bool>,
    #[serde(default)]
    pub redis_rest_url: Option<String>,
    #[serde(default)]
    pub redis_rest_token: Option<String>,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

/// Profile values after environment overrides, ready to open stores with
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedProfile {
    pub name: String,
    pub sync: SyncConfig,
    pub redis_rest_url: Option<String>,
    pub redis_rest_token: Option<String>,
    pub db_path: Option<PathBuf>,
}

impl std::fmt::Debug for ResolvedProfile {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ResolvedProfile")
            .field("name", &self.name)
            .field("sync", &self.sync)
            .field("redis_rest_url", &self.redis_rest_url)
            .field(
                "redis_rest_token",
                &self.redis_rest_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("db_path", &self.db_path)
            .finish()
    }
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tandem")
        .join(CONFIG_FILE_NAME)
}

pub fn normalize_profile_name(value: Option<&str>) -> Option<String> {
    normalize_text_option(value.map(str::to_string))
}

impl CliProfilesConfig {
    pub fn load() -> Result<Self, String> {
        Self::load_from_path(&default_config_path())
    }

    /// Read the config file; a missing file yields an empty config
    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default())
            }
            Err(error) => return Err(format!("Cannot read {}: {error}", path.display())),
        };
        let mut config: Self = serde_json::from_str(&raw)
            .map_err(|error| format!("Invalid config in {}: {error}", path.display()))?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, String> {
        let path = default_config_path();
        self.save_to_path(&path)?;
        Ok(path)
    }

    /// Write through a sibling temp file so readers never see a partial file.
    ///
    /// The file holds the Redis REST token, so it is owner-only on Unix.
    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        let mut normalized = self.clone();
        normalized.normalize();
        let json = serde_json::to_vec_pretty(&normalized)
            .map_err(|error| format!("Cannot encode config: {error}"))?;

        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .map_err(|error| format!("Cannot create {}: {error}", dir.display()))?;

        let staging = path.with_extension("json.tmp");
        std::fs::write(&staging, json)
            .map_err(|error| format!("Cannot write {}: {error}", staging.display()))?;
        restrict_permissions(&staging)?;
        std::fs::rename(&staging, path)
            .map_err(|error| format!("Cannot replace {}: {error}", path.display()))
    }

    pub fn resolve_profile_name(&self, explicit: Option<&str>) -> String {
        self.resolve_profile_name_with(explicit, |key| std::env::var(key).ok())
    }

    fn resolve_profile_name_with(
        &self,
        explicit: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> String {
        if let Some(profile) = normalize_profile_name(explicit) {
            return profile;
        }
        if let Some(profile) = normalize_profile_name(env(ENV_PROFILE).as_deref()) {
            return profile;
        }
        if let Some(profile) = normalize_profile_name(self.active_profile.as_deref()) {
            return profile;
        }
        "default".to_string()
    }

    pub fn profile(&self, name: &str) -> Option<&CliProfile> {
        self.profiles.get(name)
    }

    pub fn profile_mut_or_default(&mut self, name: &str) -> &mut CliProfile {
        self.profiles.entry(name.to_string()).or_default()
    }

    /// Resolve a profile against the process environment
    pub fn resolve(&self, explicit: Option<&str>) -> Result<ResolvedProfile, String> {
        self.resolve_with(explicit, |key| std::env::var(key).ok())
    }

    /// Resolve a profile; environment values override stored ones
    pub fn resolve_with(
        &self,
        explicit: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<ResolvedProfile, String> {
        let name = self.resolve_profile_name_with(explicit, &env);
        let stored = self.profile(&name).cloned().unwrap_or_default();

        let mut sync = SyncConfig::default();
        if let Some(namespace) =
            normalize_text_option(env(ENV_NAMESPACE)).or_else(|| stored.namespace.clone())
        {
            sync.namespace = namespace;
        }
        if let Some(raw) = normalize_text_option(env(ENV_STRATEGY)) {
            sync.strategy = raw
                .parse::<ConflictStrategy>()
                .map_err(|error| format!("{ENV_STRATEGY}: {error}"))?;
        } else if let Some(strategy) = stored.strategy {
            sync.strategy = strategy;
        }
        if let Some(strict) = stored.strict_content_check {
            sync.strict_content_check = strict;
        }
        let sync = sync.validated().map_err(|error| error.to_string())?;

        let redis_rest_url =
            normalize_text_option(env(ENV_REDIS_REST_URL)).or_else(|| stored.redis_rest_url.clone());
        if let Some(url) = redis_rest_url.as_deref() {
            if !is_http_url(url) {
                return Err(format!(
                    "Redis REST URL must start with http:// or https://, got '{url}'"
                ));
            }
        }
        let redis_rest_token = normalize_text_option(env(ENV_REDIS_REST_TOKEN))
            .or_else(|| stored.redis_rest_token.clone());
        let db_path = normalize_text_option(env(ENV_DB_PATH))
            .map(PathBuf::from)
            .or_else(|| stored.db_path.clone());

        Ok(ResolvedProfile {
            name,
            sync,
            redis_rest_url,
            redis_rest_token,
            db_path,
        })
    }

    fn normalize(&mut self) {
        self.active_profile = normalize_profile_name(self.active_profile.as_deref());
        for profile in self.profiles.values_mut() {
            profile.normalize();
        }
    }
}

impl CliProfile {
    fn normalize(&mut self) {
        self.namespace = normalize_text_option(self.namespace.clone());
        self.redis_rest_url = normalize_text_option(self.redis_rest_url.clone())
            .map(|url| url.trim_end_matches('/').to_string());
        self.redis_rest_token = normalize_text_option(self.redis_rest_token.clone());
        self.db_path = self
            .db_path
            .take()
            .filter(|path| !path.as_os_str().is_empty());
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), String> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|error| format!("Cannot restrict {}: {error}", path.display()))
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn restrict_permissions(_path: &Path) -> Result<(), String> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| values.get(key).cloned()
    }

    fn config_with(name: &str, profile: CliProfile) -> CliProfilesConfig {
        let mut config = CliProfilesConfig {
            version: 1,
            active_profile: Some(name.to_string()),
            profiles: BTreeMap::new(),
        };
        config.profiles.insert(name.to_string(), profile);
        config
    }

    #[test]
    fn normalize_profile_name_rejects_empty() {
        assert_eq!(normalize_profile_name(None), None);
        assert_eq!(normalize_profile_name(Some(" ")), None);
    }

    #[test]
    fn config_roundtrip_preserves_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let config = config_with(
            "default",
            CliProfile {
                namespace: Some(" family ".to_string()),
                strategy: Some(ConflictStrategy::Merge),
                strict_content_check: Some(true),
                redis_rest_url: Some(" https://eu1.example.upstash.io/ ".to_string()),
                redis_rest_token: Some(" secret ".to_string()),
                db_path: None,
            },
        );

        config.save_to_path(&path).unwrap();
        let loaded = CliProfilesConfig::load_from_path(&path).unwrap();
        let profile = loaded.profiles.get("default").unwrap();
        assert_eq!(profile.namespace.as_deref(), Some("family"));
        assert_eq!(profile.strategy, Some(ConflictStrategy::Merge));
        assert_eq!(
            profile.redis_rest_url.as_deref(),
            Some("https://eu1.example.upstash.io")
        );
        assert_eq!(profile.redis_rest_token.as_deref(), Some("secret"));
    }

    #[cfg(unix)]
    #[test]
    fn saved_config_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        CliProfilesConfig::default().save_to_path(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = CliProfilesConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, CliProfilesConfig::default());
    }

    #[test]
    fn resolve_profile_name_prefers_explicit_then_env_then_active() {
        let config = config_with("work", CliProfile::default());
        assert_eq!(
            config.resolve_profile_name_with(Some("mobile"), env(&[(ENV_PROFILE, "env")])),
            "mobile"
        );
        assert_eq!(
            config.resolve_profile_name_with(None, env(&[(ENV_PROFILE, "env")])),
            "env"
        );
        assert_eq!(config.resolve_profile_name_with(None, env(&[])), "work");
        assert_eq!(
            CliProfilesConfig::default().resolve_profile_name_with(None, env(&[])),
            "default"
        );
    }

    #[test]
    fn environment_overrides_stored_values() {
        let config = config_with(
            "default",
            CliProfile {
                namespace: Some("stored".to_string()),
                strategy: Some(ConflictStrategy::Merge),
                redis_rest_url: Some("https://stored.example".to_string()),
                ..CliProfile::default()
            },
        );

        let resolved = config
            .resolve_with(
                None,
                env(&[
                    (ENV_NAMESPACE, "from-env"),
                    (ENV_STRATEGY, "remote-wins"),
                    (ENV_REDIS_REST_TOKEN, "token"),
                    (ENV_DB_PATH, "/tmp/tandem.db"),
                ]),
            )
            .unwrap();
        assert_eq!(resolved.sync.namespace, "from-env");
        assert_eq!(resolved.sync.strategy, ConflictStrategy::RemoteWins);
        assert_eq!(resolved.redis_rest_url.as_deref(), Some("https://stored.example"));
        assert_eq!(resolved.redis_rest_token.as_deref(), Some("token"));
        assert_eq!(resolved.db_path, Some(PathBuf::from("/tmp/tandem.db")));
        assert!(!format!("{resolved:?}").contains("token\""));
    }

    #[test]
    fn resolve_rejects_invalid_values() {
        let config = CliProfilesConfig::default();
        assert!(config
            .resolve_with(None, env(&[(ENV_STRATEGY, "coin-flip")]))
            .is_err());
        assert!(config
            .resolve_with(None, env(&[(ENV_NAMESPACE, "a:b")]))
            .is_err());
        assert!(config
            .resolve_with(None, env(&[(ENV_REDIS_REST_URL, "redis.example")]))
            .is_err());
    }

    #[test]
    fn resolve_defaults_without_config() {
        let resolved = CliProfilesConfig::default()
            .resolve_with(None, env(&[]))
            .unwrap();
        assert_eq!(resolved.name, "default");
        assert_eq!(resolved.sync, SyncConfig::default());
        assert_eq!(resolved.redis_rest_url, None);
        assert_eq!(resolved.db_path, None);
    }
}
