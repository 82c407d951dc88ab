use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Owner id stamped on every row this installation writes.
    pub user_id: Uuid,

    #[serde(default)]
    pub user_name: Option<String>,

    /// Shared secret the HTTP sweep trigger expects as a bearer token.
    #[serde(default)]
    pub cron_secret: Option<String>,

    /// Endpoint notified after each committed expense creation.
    #[serde(default)]
    pub recalc_webhook: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            user_id: Uuid::new_v4(),
            user_name: Some(default_user_name()),
            cron_secret: None,
            recalc_webhook: None,
        }
    }
}

fn default_user_name() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| "me".to_string())
}

impl AppConfig {
    pub fn masked_secret(&self) -> String {
        match self.cron_secret.as_deref() {
            None | Some("") => "(not set)".to_string(),
            Some(s) if s.chars().count() <= 4 => "****".to_string(),
            Some(s) => format!("{}****", s.chars().take(2).collect::<String>()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

pub fn app_paths(override_home: Option<PathBuf>) -> Result<AppPaths> {
    if let Some(home) = override_home {
        return Ok(AppPaths {
            config_dir: home.join("config"),
            data_dir: home.join("data"),
        });
    }

    let proj = ProjectDirs::from("com", "paydown", "paydown")
        .context("Failed to resolve platform directories")?;

    Ok(AppPaths {
        config_dir: proj.config_dir().to_path_buf(),
        data_dir: proj.data_dir().to_path_buf(),
    })
}

pub fn load_or_init_config(paths: &AppPaths) -> Result<(AppConfig, PathBuf)> {
    fs::create_dir_all(&paths.config_dir)
        .with_context(|| format!("Failed to create config dir {}", paths.config_dir.display()))?;

    let cfg_path = paths.config_dir.join("config.json");
    if !cfg_path.exists() {
        let cfg = AppConfig::default();
        write_config(&cfg_path, &cfg)?;
        return Ok((cfg, cfg_path));
    }

    let raw = fs::read_to_string(&cfg_path)
        .with_context(|| format!("Failed to read {}", cfg_path.display()))?;
    let mut cfg: AppConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", cfg_path.display()))?;

    // Older configs predate user_name.
    if cfg.user_name.is_none() {
        cfg.user_name = Some(default_user_name());
        write_config(&cfg_path, &cfg)?;
    }

    Ok((cfg, cfg_path))
}

pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(cfg)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// The calendar day operations run against: `--today` when given, else the
/// local date.
pub fn resolve_today(raw: Option<&str>) -> Result<NaiveDate> {
    match raw {
        None => Ok(Local::now().date_naive()),
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("Invalid --today date: {s} (expected YYYY-MM-DD)")),
    }
}
