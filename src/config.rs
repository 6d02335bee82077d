use std::env;

/// Process configuration, read once at startup.
///
/// Every setting is optional: a missing pricing key skips the primary quote,
/// missing store credentials put the store into always-miss mode, and a
/// missing ingestion secret leaves the ingestion endpoints open. Nothing here
/// can fail startup.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub gold_api_key: Option<String>,
    pub gold_api_base_url: Option<String>,
    pub fallback_api_base_url: Option<String>,
    pub exchange_api_base_url: Option<String>,
    pub store_rest_url: Option<String>,
    pub store_rest_token: Option<String>,
    pub ingest_secret: Option<String>,
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            gold_api_key: env_opt("GOLD_API_KEY"),
            gold_api_base_url: env_opt("GOLD_API_BASE_URL"),
            fallback_api_base_url: env_opt("FALLBACK_API_BASE_URL"),
            exchange_api_base_url: env_opt("EXCHANGE_API_BASE_URL"),
            store_rest_url: env_opt("STORE_REST_URL"),
            store_rest_token: env_opt("STORE_REST_TOKEN"),
            ingest_secret: env_opt("INGEST_SECRET"),
            bind_addr: env_opt("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        }
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
