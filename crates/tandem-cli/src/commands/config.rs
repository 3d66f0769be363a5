use std::path::PathBuf;

use serde::Serialize;
use tandem_core::util::{is_http_url, normalize_text_option};
use tandem_core::ConflictStrategy;

use crate::cli::ConfigCommands;
use crate::config_profiles::{default_config_path, normalize_profile_name, CliProfilesConfig};
use crate::error::CliError;

/// Values supplied to `config init`; `None` keeps what is stored
#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub namespace: Option<String>,
    pub strategy: Option<ConflictStrategy>,
    pub strict_content_check: Option<bool>,
    pub redis_rest_url: Option<String>,
    pub redis_rest_token: Option<String>,
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct EffectiveConfig {
    profile: String,
    config_path: String,
    namespace: String,
    strategy: String,
    strict_content_check: bool,
    redis_rest_url: Option<String>,
    redis_rest_token_set: bool,
    db_path: Option<String>,
}

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            profile,
            namespace,
            strategy,
            strict,
            redis_url,
            redis_token,
            db_path,
            no_activate,
        } => {
            let update = ProfileUpdate {
                namespace,
                strategy: strategy.map(Into::into),
                strict_content_check: strict,
                redis_rest_url: redis_url,
                redis_rest_token: redis_token,
                db_path,
            };
            run_config_init(profile.as_deref().or(global_profile), update, no_activate)
        }
        ConfigCommands::Show { profile, json } => {
            run_config_show(profile.as_deref().or(global_profile), json)
        }
        ConfigCommands::Use { profile } => run_config_use(&profile),
    }
}

pub fn run_config_init(
    profile_name: Option<&str>,
    update: ProfileUpdate,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = apply_profile_update(&mut config, profile_name, update, no_activate)?;
    let path = config.save().map_err(CliError::Config)?;

    println!("Saved profile '{profile_name}' to {}", path.display());
    if no_activate {
        println!("Active profile unchanged");
    } else {
        println!("Active profile: {profile_name}");
    }
    Ok(())
}

/// Merge an update into the named profile and validate the result
pub fn apply_profile_update(
    config: &mut CliProfilesConfig,
    profile_name: Option<&str>,
    update: ProfileUpdate,
    no_activate: bool,
) -> Result<String, CliError> {
    let profile_name = config.resolve_profile_name(profile_name);
    let profile = config.profile_mut_or_default(&profile_name);

    if let Some(namespace) = normalize_text_option(update.namespace) {
        profile.namespace = Some(namespace);
    }
    if let Some(strategy) = update.strategy {
        profile.strategy = Some(strategy);
    }
    if let Some(strict) = update.strict_content_check {
        profile.strict_content_check = Some(strict);
    }
    if let Some(url) = normalize_text_option(update.redis_rest_url) {
        if !is_http_url(&url) {
            return Err(CliError::Config(format!(
                "Redis REST URL must start with http:// or https://, got '{url}'"
            )));
        }
        profile.redis_rest_url = Some(url.trim_end_matches('/').to_string());
    }
    if let Some(token) = normalize_text_option(update.redis_rest_token) {
        profile.redis_rest_token = Some(token);
    }
    if let Some(path) = update.db_path {
        profile.db_path = Some(path);
    }

    // Stored values must pass the checks a sync run applies
    config
        .resolve_with(Some(&profile_name), |_| None)
        .map_err(CliError::Config)?;

    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }
    Ok(profile_name)
}

pub fn run_config_show(profile_name: Option<&str>, as_json: bool) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let resolved = config.resolve(profile_name).map_err(CliError::Config)?;

    let effective = EffectiveConfig {
        profile: resolved.name.clone(),
        config_path: default_config_path().display().to_string(),
        namespace: resolved.sync.namespace.clone(),
        strategy: resolved.sync.strategy.to_string(),
        strict_content_check: resolved.sync.strict_content_check,
        redis_rest_url: resolved.redis_rest_url.clone(),
        redis_rest_token_set: resolved.redis_rest_token.is_some(),
        db_path: resolved
            .db_path
            .as_ref()
            .map(|path| path.display().to_string()),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&effective)?);
        return Ok(());
    }

    println!("Profile:     {}", effective.profile);
    println!("Config file: {}", effective.config_path);
    println!("Namespace:   {}", effective.namespace);
    println!("Strategy:    {}", effective.strategy);
    println!("Strict:      {}", effective.strict_content_check);
    println!(
        "Backend:     {}",
        effective.redis_rest_url.as_deref().unwrap_or("memory (local only)")
    );
    if effective.redis_rest_url.is_some() && !effective.redis_rest_token_set {
        println!("Warning: no Redis REST token configured");
    }
    if let Some(db_path) = &effective.db_path {
        println!("Database:    {db_path}");
    }
    Ok(())
}

pub fn run_config_use(profile_name: &str) -> Result<(), CliError> {
    let profile_name = normalize_profile_name(Some(profile_name))
        .ok_or_else(|| CliError::Config("Profile name cannot be empty".to_string()))?;
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    if config.profile(&profile_name).is_none() {
        return Err(CliError::Config(format!(
            "Profile '{profile_name}' does not exist; run `tandem config init --profile {profile_name}`"
        )));
    }
    config.active_profile = Some(profile_name.clone());
    config.save().map_err(CliError::Config)?;
    println!("Active profile: {profile_name}");
    Ok(())
}
