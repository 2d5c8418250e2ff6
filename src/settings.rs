use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use directories::BaseDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub const DEFAULT_REST_BASE_URL: &str = "https://api.todoist.com/rest/v2";
pub const DEFAULT_SYNC_BASE_URL: &str = "https://api.todoist.com/sync/v9";

const DATA_DIR_NAME: &str = "TodoistAnalytics";
const CACHE_FILE_NAME: &str = "snapshot_cache.json";

static ENV_API_TOKEN: Lazy<Option<String>> = Lazy::new(|| non_empty_env("TODOIST_API_TOKEN"));
static ENV_PROJECT_ID: Lazy<Option<String>> = Lazy::new(|| non_empty_env("TODOIST_PROJECT_ID"));

fn non_empty_env(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub project_id: String,
    pub api_token: String,
    pub refresh_seconds: u64,
    pub monthly_goal: u32,
    pub top_sections: usize,
    pub request_timeout_seconds: u64,
    pub cache_path: Option<PathBuf>,
    pub rest_base_url: String,
    pub sync_base_url: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            api_token: String::new(),
            refresh_seconds: 5,
            monthly_goal: 100,
            top_sections: 3,
            request_timeout_seconds: 30,
            cache_path: None,
            rest_base_url: DEFAULT_REST_BASE_URL.to_string(),
            sync_base_url: DEFAULT_SYNC_BASE_URL.to_string(),
        }
    }
}

impl AppSettings {
    pub fn sanitize(&mut self) {
        self.project_id = self.project_id.trim().to_string();
        self.api_token = self.api_token.trim().to_string();
        self.refresh_seconds = self.refresh_seconds.clamp(5, 3600);
        self.monthly_goal = self.monthly_goal.max(1);
        self.top_sections = self.top_sections.clamp(1, 10);
        self.request_timeout_seconds = self.request_timeout_seconds.clamp(1, 120);
        if self.rest_base_url.trim().is_empty() {
            self.rest_base_url = DEFAULT_REST_BASE_URL.to_string();
        }
        if self.sync_base_url.trim().is_empty() {
            self.sync_base_url = DEFAULT_SYNC_BASE_URL.to_string();
        }
    }

    /// Environment credentials win over whatever the settings file holds.
    pub fn apply_env_overrides(&mut self) {
        if let Some(token) = ENV_API_TOKEN.as_ref() {
            self.api_token = token.clone();
        }
        if let Some(project_id) = ENV_PROJECT_ID.as_ref() {
            self.project_id = project_id.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_token.trim().is_empty() {
            bail!("Todoist API token is not configured (set TODOIST_API_TOKEN or run `configure --token`)");
        }
        if self.project_id.trim().is_empty() {
            bail!("Todoist project id is not configured (set TODOIST_PROJECT_ID or run `configure --project-id`)");
        }
        Ok(())
    }

    pub fn resolved_cache_path(&self, data_dir: &Path) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| data_dir.join(CACHE_FILE_NAME))
    }
}

pub fn default_data_dir() -> Result<PathBuf> {
    let base_dirs = BaseDirs::new().context("Unable to determine platform data directory")?;
    let data_dir = base_dirs.data_local_dir().join(DATA_DIR_NAME);
    fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
    Ok(data_dir)
}

#[derive(Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: &Path) -> Self {
        let path = data_dir.join("settings.json");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<AppSettings> {
        if !self.path.exists() {
            return Ok(AppSettings::default());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let mut settings: AppSettings = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        settings.sanitize();
        Ok(settings)
    }

    pub fn save(&self, settings: &AppSettings) -> Result<()> {
        let mut normalized = settings.clone();
        normalized.sanitize();
        let payload = serde_json::to_string_pretty(&normalized)?;
        fs::write(&self.path, payload)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_clamps_and_trims() {
        let mut settings = AppSettings {
            project_id: "  123 ".to_string(),
            refresh_seconds: 0,
            monthly_goal: 0,
            top_sections: 50,
            request_timeout_seconds: 0,
            rest_base_url: " ".to_string(),
            ..AppSettings::default()
        };
        settings.sanitize();
        assert_eq!(settings.project_id, "123");
        assert_eq!(settings.refresh_seconds, 5);
        assert_eq!(settings.monthly_goal, 1);
        assert_eq!(settings.top_sections, 10);
        assert_eq!(settings.request_timeout_seconds, 1);
        assert_eq!(settings.rest_base_url, DEFAULT_REST_BASE_URL);
    }

    #[test]
    fn validate_requires_credentials() {
        let mut settings = AppSettings::default();
        assert!(settings.validate().is_err());
        settings.api_token = "token".to_string();
        assert!(settings.validate().is_err());
        settings.project_id = "p1".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn store_round_trips_and_fills_missing_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::new(dir.path());
        assert_eq!(store.load().expect("defaults"), AppSettings::default());

        fs::write(store.path(), r#"{ "project_id": "p9", "monthly_goal": 40 }"#).expect("write");
        let loaded = store.load().expect("load");
        assert_eq!(loaded.project_id, "p9");
        assert_eq!(loaded.monthly_goal, 40);
        assert_eq!(loaded.refresh_seconds, 5);

        let mut updated = loaded.clone();
        updated.refresh_seconds = 60;
        store.save(&updated).expect("save");
        assert_eq!(store.load().expect("reload").refresh_seconds, 60);
    }

    #[test]
    fn cache_path_defaults_to_data_dir() {
        let settings = AppSettings::default();
        let path = settings.resolved_cache_path(Path::new("/tmp/data"));
        assert_eq!(path, Path::new("/tmp/data").join(CACHE_FILE_NAME));
    }
}
