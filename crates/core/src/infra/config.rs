use std::path::{Path, PathBuf};

use crate::domain::error::AppError;
use crate::domain::settings::SyncSettings;

pub const API_BASE_ENV: &str = "DASHBOARD_API_BASE";
pub const API_TOKEN_ENV: &str = "DASHBOARD_API_TOKEN";

/// 既定の設定ファイルパス（<config_dir>/site-audit-dashboard/settings.json）
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("site-audit-dashboard")
        .join("settings.json")
}

/// 設定を読み込む。ファイルが無ければ既定値、環境変数でベースURLを上書き
pub fn load_settings(path: &Path) -> Result<SyncSettings, AppError> {
    let settings = read_settings_file(path)?;
    validate(&settings, path)?;
    Ok(apply_overrides(settings, std::env::var(API_BASE_ENV).ok()))
}

fn validate(settings: &SyncSettings, path: &Path) -> Result<(), AppError> {
    let zero = settings.zero_intervals();
    if zero.is_empty() {
        return Ok(());
    }
    Err(AppError::config("間隔には正の値を指定してください")
        .with_detail(format!("{}: {}", path.display(), zero.join(", "))))
}

fn read_settings_file(path: &Path) -> Result<SyncSettings, AppError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
            AppError::config("設定ファイルを解釈できません")
                .with_detail(format!("{}: {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("Settings file not found, using defaults: {}", path.display());
            Ok(SyncSettings::default())
        }
        Err(e) => Err(AppError::config("設定ファイルを読み込めません")
            .with_detail(format!("{}: {e}", path.display()))),
    }
}

fn apply_overrides(mut settings: SyncSettings, api_base: Option<String>) -> SyncSettings {
    if let Some(base) = api_base.filter(|b| !b.trim().is_empty()) {
        settings.api_base_url = base.trim().to_string();
    }
    settings.api_base_url = settings.api_base_url.trim_end_matches('/').to_string();
    settings
}
