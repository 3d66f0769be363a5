use serde::Serialize;

use crate::commands::common::AppContext;
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct DeviceInfo {
    device_id: String,
    profile: String,
    db_path: String,
    namespace: String,
    backend: String,
}

pub fn run_device(as_json: bool, ctx: &AppContext) -> Result<(), CliError> {
    let info = DeviceInfo {
        device_id: ctx.device_id.to_string(),
        profile: ctx.profile.name.clone(),
        db_path: ctx.db_path.display().to_string(),
        namespace: ctx.profile.sync.namespace.clone(),
        backend: ctx.backend.clone(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Device ID: {}", info.device_id);
    println!("Profile:   {}", info.profile);
    println!("Database:  {}", info.db_path);
    println!("Namespace: {}", info.namespace);
    println!("Backend:   {}", info.backend);
    Ok(())
}
