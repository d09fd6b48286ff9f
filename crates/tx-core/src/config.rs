use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{domain::Destination, errors::Error, scheduler::CronExpr, Result};

const DEFAULT_CONFIG_PATH: &str = "config.json";
const DEFAULT_PAGE_LIMIT: u32 = 100;
const MAX_PAGE_LIMIT: u32 = 100;

/// One trackable project and where its digests go.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ProjectConfig {
    /// Tracker project identifier (numeric id or slug).
    pub id: String,
    pub name: String,
    pub chat_id: Destination,
    pub test_chat_id: Destination,
    /// Label used inside digest lines; defaults to `name`.
    #[serde(default)]
    pub tracker: Option<String>,
    #[serde(default = "default_true")]
    pub export: bool,
}

impl ProjectConfig {
    pub fn tracker_label(&self) -> &str {
        self.tracker.as_deref().unwrap_or(&self.name)
    }

    pub fn destination(&self, is_test: bool) -> &Destination {
        if is_test {
            &self.test_chat_id
        } else {
            &self.chat_id
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ScheduleConfig {
    /// 5-field cron expression evaluated in local time.
    pub cron: String,
    #[serde(default)]
    pub test: bool,
}

/// Typed configuration for the exporter.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub tracker_url: String,
    #[serde(default)]
    pub tracker_api_key: String,
    #[serde(default)]
    pub telegram_bot_token: String,
    #[serde(default)]
    pub allowed_users: Vec<i64>,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
    pub projects: Vec<ProjectConfig>,
}

impl Config {
    /// Load from `TEXPORTER_CONFIG` (default `./config.json`), after reading
    /// `.env`. Credentials in the environment win over the file.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let path = env_str("TEXPORTER_CONFIG")
            .and_then(non_empty)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut cfg = Self::from_file(&path)?;

        if let Some(key) = env_str("TRACKER_API_KEY").and_then(non_empty) {
            cfg.tracker_api_key = key;
        }
        if let Some(token) = env_str("TELEGRAM_BOT_TOKEN").and_then(non_empty) {
            cfg.telegram_bot_token = token;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let txt = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_json(&txt)
    }

    /// Parse without validation; call [`Config::validate`] afterwards.
    pub fn from_json(txt: &str) -> Result<Self> {
        serde_json::from_str(txt).map_err(|e| Error::Config(format!("malformed config: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "telegram_bot_token (or TELEGRAM_BOT_TOKEN) is required".to_string(),
            ));
        }
        if self.tracker_api_key.trim().is_empty() {
            return Err(Error::Config(
                "tracker_api_key (or TRACKER_API_KEY) is required".to_string(),
            ));
        }
        if self.allowed_users.is_empty() {
            return Err(Error::Config("allowed_users must not be empty".to_string()));
        }
        url::Url::parse(&self.tracker_url)
            .map_err(|e| Error::Config(format!("invalid tracker_url: {e}")))?;
        if self.page_limit == 0 || self.page_limit > MAX_PAGE_LIMIT {
            return Err(Error::Config(format!(
                "page_limit must be within 1..={MAX_PAGE_LIMIT}"
            )));
        }

        let mut seen = HashSet::new();
        for p in &self.projects {
            if p.id.trim().is_empty() {
                return Err(Error::Config(format!("project {:?} has an empty id", p.name)));
            }
            if !seen.insert(p.id.as_str()) {
                return Err(Error::Config(format!("duplicate project id: {}", p.id)));
            }
        }

        if let Some(s) = &self.schedule {
            CronExpr::parse(&s.cron)
                .map_err(|e| Error::Config(format!("invalid schedule.cron: {e}")))?;
        }

        Ok(())
    }

    /// Projects that take part in exports, in configuration order.
    pub fn exported_projects(&self) -> impl Iterator<Item = &ProjectConfig> {
        self.projects.iter().filter(|p| p.export)
    }
}

fn default_true() -> bool {
    true
}

fn default_page_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
