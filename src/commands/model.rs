use crate::config::Settings;
use crate::services::classifier::model_manager::ModelManager;
use std::process::ExitCode;

pub async fn download(settings: &Settings) -> anyhow::Result<ExitCode> {
    let manager = ModelManager::new(settings);
    if manager.is_downloaded() {
        tracing::info!(model = manager.model_type.as_str(), "model already present");
    } else {
        manager.download_model().await?;
    }
    println!("{}", serde_json::to_string_pretty(&manager.status())?);
    Ok(ExitCode::SUCCESS)
}

pub fn status(settings: &Settings) -> anyhow::Result<ExitCode> {
    let manager = ModelManager::new(settings);
    let status = manager.status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(if status.downloaded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
