use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub backend_url: String,
    pub api_key: String,
    pub realtime_url: String,
    pub message_page_size: usize,
    pub request_timeout_seconds: u64,
    pub recent_rooms_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let backend_url = env::var("TEMPCHAT_BACKEND_URL")
            .map_err(|_| ConfigError::MissingBackendUrl)?
            .trim_end_matches('/')
            .to_string();

        // The realtime endpoint defaults to the backend host over ws(s).
        let realtime_url = env::var("TEMPCHAT_REALTIME_URL").unwrap_or_else(|_| {
            let ws_base = backend_url
                .replacen("https://", "wss://", 1)
                .replacen("http://", "ws://", 1);
            format!("{}/realtime", ws_base)
        });

        Ok(Config {
            backend_url,
            api_key: env::var("TEMPCHAT_API_KEY").map_err(|_| ConfigError::MissingApiKey)?,
            realtime_url,
            message_page_size: env::var("TEMPCHAT_PAGE_SIZE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .unwrap_or(50),
            request_timeout_seconds: env::var("TEMPCHAT_REQUEST_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .unwrap_or(15),
            recent_rooms_path: env::var("TEMPCHAT_RECENT_ROOMS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("tempchat_recent_rooms.json")),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TEMPCHAT_BACKEND_URL environment variable is required")]
    MissingBackendUrl,
    #[error("TEMPCHAT_API_KEY environment variable is required")]
    MissingApiKey,
}
