use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::auth::TokenTtl;
use crate::error::{AppError, Result};
use crate::models::ImportMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
    #[serde(default = "default_access_token_minutes")]
    pub access_token_minutes: i64,
    #[serde(default = "default_refresh_token_days")]
    pub refresh_token_days: i64,
    #[serde(default)]
    pub default_import_mode: ImportMode,
}

fn default_bind_addr() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_access_token_minutes() -> i64 {
    15
}

fn default_refresh_token_days() -> i64 {
    7
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            bind_addr: default_bind_addr(),
            frontend_url: default_frontend_url(),
            access_token_minutes: default_access_token_minutes(),
            refresh_token_days: default_refresh_token_days(),
            default_import_mode: ImportMode::default(),
        }
    }
}

impl Settings {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("spendwise.db")
    }

    pub fn token_ttl(&self) -> TokenTtl {
        TokenTtl {
            access_minutes: self.access_token_minutes,
            refresh_days: self.refresh_token_days,
        }
    }

    /// Apply `SPENDWISE_DATA_DIR`, `PORT` and `FRONTEND_URL` on top of the file.
    pub fn apply_env<F>(mut self, var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = var("SPENDWISE_DATA_DIR").filter(|v| !v.is_empty()) {
            self.data_dir = shellexpand_path(&dir);
        }
        if let Some(port) = var("PORT").and_then(|p| p.trim().parse::<u16>().ok()) {
            let host = self
                .bind_addr
                .rsplit_once(':')
                .map(|(h, _)| h.to_string())
                .unwrap_or_else(|| "127.0.0.1".to_string());
            self.bind_addr = format!("{host}:{port}");
        }
        if let Some(url) = var("FRONTEND_URL").filter(|v| !v.is_empty()) {
            self.frontend_url = url;
        }
        self
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("spendwise")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spendwise")
}

/// Settings file merged with defaults, then environment overrides.
pub fn load_settings() -> Settings {
    let path = settings_path();
    let from_file = if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    };
    from_file.apply_env(|k| std::env::var(k).ok())
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings).map_err(|e| AppError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_load_merges_with_defaults() {
        let json = r#"{"data_dir": "/tmp/test", "frontend_url": "https://app.example.com"}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.bind_addr, "127.0.0.1:5000");
        assert_eq!(s.frontend_url, "https://app.example.com");
        assert_eq!(s.access_token_minutes, 15);
        assert_eq!(s.default_import_mode, ImportMode::BankStatement);
        assert_eq!(s.db_path(), PathBuf::from("/tmp/test/spendwise.db"));
    }

    #[test]
    fn test_import_mode_from_file() {
        let json = r#"{"data_dir": "/tmp/test", "default_import_mode": "credit_card"}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.default_import_mode, ImportMode::CreditCard);
    }

    #[test]
    fn test_env_overrides() {
        let s = Settings { data_dir: "/tmp/file".into(), ..Settings::default() }.apply_env(env(&[
            ("SPENDWISE_DATA_DIR", "/tmp/env-data"),
            ("PORT", "8080"),
            ("FRONTEND_URL", "https://spend.example.com"),
        ]));
        assert_eq!(s.data_dir, "/tmp/env-data");
        assert_eq!(s.bind_addr, "127.0.0.1:8080");
        assert_eq!(s.frontend_url, "https://spend.example.com");
    }

    #[test]
    fn test_bad_port_is_ignored() {
        let s = Settings::default().apply_env(env(&[("PORT", "not-a-port")]));
        assert_eq!(s.bind_addr, "127.0.0.1:5000");
    }

    #[test]
    fn test_token_ttl_follows_settings() {
        let s = Settings { access_token_minutes: 5, refresh_token_days: 30, ..Settings::default() };
        let ttl = s.token_ttl();
        assert_eq!((ttl.access_minutes, ttl.refresh_days), (5, 30));
    }
}
