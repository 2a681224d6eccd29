use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::session::{Auth, Session};

pub const SETTINGS_FILE: &str = "fleet.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub server_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub session_id: Option<String>,
    pub csrf_token: Option<String>,
    pub http_timeout_seconds: u64,
    pub lookup_page_length: u32,
    pub search_debounce_ms: u64,
    pub default_company: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".into(),
            api_key: None,
            api_secret: None,
            session_id: None,
            csrf_token: None,
            http_timeout_seconds: 30,
            lookup_page_length: 20,
            search_debounce_ms: 500,
            default_company: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    api_key: Option<String>,
    api_secret: Option<String>,
    session_id: Option<String>,
    csrf_token: Option<String>,
    http_timeout_seconds: Option<u64>,
    lookup_page_length: Option<u32>,
    search_debounce_ms: Option<u64>,
    default_company: Option<String>,
}

impl ClientSettings {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    /// Token auth wins over a session cookie when both are configured.
    pub fn session(&self) -> Result<Session> {
        let mut session = Session::new(&self.server_url)?;
        match (&self.api_key, &self.api_secret, &self.session_id) {
            (Some(key), Some(secret), _) => {
                session = session.with_auth(Auth::Token {
                    key: key.clone(),
                    secret: secret.clone(),
                });
            }
            (_, _, Some(sid)) => session = session.with_auth(Auth::Sid(sid.clone())),
            _ => {}
        }
        if let Some(token) = &self.csrf_token {
            session = session.with_csrf_token(token.clone());
        }
        Ok(session)
    }

    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.http_timeout())
            .build()
            .context("failed to build http client")
    }
}

pub fn load_settings() -> ClientSettings {
    load_settings_with(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the settings file, then environment variables.
pub fn load_settings_with(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file_settings(&mut settings, file_cfg),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring malformed settings file")
            }
        }
    }

    let lookup = |names: &[&str]| names.iter().rev().find_map(|name| env(name));

    if let Some(v) = lookup(&["FLEET_SERVER_URL", "APP__SERVER_URL"]) {
        settings.server_url = v;
    }
    if let Some(v) = lookup(&["FLEET_API_KEY", "APP__API_KEY"]) {
        settings.api_key = Some(v);
    }
    if let Some(v) = lookup(&["FLEET_API_SECRET", "APP__API_SECRET"]) {
        settings.api_secret = Some(v);
    }
    if let Some(v) = lookup(&["FLEET_SID", "APP__SESSION_ID"]) {
        settings.session_id = Some(v);
    }
    if let Some(v) = lookup(&["FLEET_CSRF_TOKEN", "APP__CSRF_TOKEN"]) {
        settings.csrf_token = Some(v);
    }
    if let Some(v) = lookup(&["APP__HTTP_TIMEOUT_SECONDS"]) {
        if let Ok(parsed) = v.parse() {
            settings.http_timeout_seconds = parsed;
        }
    }
    if let Some(v) = lookup(&["APP__LOOKUP_PAGE_LENGTH"]) {
        if let Ok(parsed) = v.parse() {
            settings.lookup_page_length = parsed;
        }
    }
    if let Some(v) = lookup(&["APP__SEARCH_DEBOUNCE_MS"]) {
        if let Ok(parsed) = v.parse() {
            settings.search_debounce_ms = parsed;
        }
    }
    if let Some(v) = lookup(&["FLEET_DEFAULT_COMPANY", "APP__DEFAULT_COMPANY"]) {
        settings.default_company = Some(v);
    }

    settings
}

fn apply_file_settings(settings: &mut ClientSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if file_cfg.api_key.is_some() {
        settings.api_key = file_cfg.api_key;
    }
    if file_cfg.api_secret.is_some() {
        settings.api_secret = file_cfg.api_secret;
    }
    if file_cfg.session_id.is_some() {
        settings.session_id = file_cfg.session_id;
    }
    if file_cfg.csrf_token.is_some() {
        settings.csrf_token = file_cfg.csrf_token;
    }
    if let Some(v) = file_cfg.http_timeout_seconds {
        settings.http_timeout_seconds = v;
    }
    if let Some(v) = file_cfg.lookup_page_length {
        settings.lookup_page_length = v;
    }
    if let Some(v) = file_cfg.search_debounce_ms {
        settings.search_debounce_ms = v;
    }
    if file_cfg.default_company.is_some() {
        settings.default_company = file_cfg.default_company;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
