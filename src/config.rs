use std::path::PathBuf;

use crate::error::ConfigError;

pub const DEFAULT_MODEL: &str = "google-ai-studio/gemini-2.5-flash";

/// Runtime settings, read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Absent means the in-memory stores are used.
    pub database_url: Option<String>,
    pub ai_base_url: String,
    pub ai_api_key: String,
    pub default_model: String,
    pub documents_dir: PathBuf,
    pub serpapi_key: Option<String>,
    pub fb_page_token: Option<String>,
    pub fb_app_secret: Option<String>,
    pub fb_graph_url: String,
    pub assistant_name: String,
    pub assistant_language: String,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidPort(raw))?,
            None => 4000,
        };

        Ok(Self {
            port,
            database_url: get("DATABASE_URL"),
            ai_base_url: get("AI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            ai_api_key: get("AI_API_KEY")
                .or_else(|| get("OPENAI_API_KEY"))
                .unwrap_or_default(),
            default_model: get("DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            documents_dir: get("DOCUMENTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./documents")),
            serpapi_key: get("SERPAPI_KEY"),
            fb_page_token: get("FB_PAGE_TOKEN"),
            fb_app_secret: get("FB_APP_SECRET"),
            fb_graph_url: get("FB_GRAPH_URL")
                .unwrap_or_else(|| "https://graph.facebook.com/v18.0".to_string())
                .trim_end_matches('/')
                .to_string(),
            assistant_name: get("ASSISTANT_NAME").unwrap_or_else(|| "Oranji".to_string()),
            assistant_language: get("ASSISTANT_LANGUAGE")
                .unwrap_or_else(|| "Vietnamese".to_string()),
            log_json: get("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        })
    }
}
