use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use framesync_core::cache::DEFAULT_CACHE_CAPACITY;

/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a backend on `localhost:8006`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// WebSocket origin, endpoint paths are appended to it.
    pub ws_url: String,
    /// HTTP origin for the request/response searches.
    pub http_url: String,
    pub reconnect_delay: Duration,
    /// Quiet window before a burst of submits is dispatched.
    pub debounce: Duration,
    pub cache_capacity: usize,
    pub http_timeout: Duration,
    /// How long a WebSocket search may stay unanswered before the loading
    /// flag is cleared. `None` waits forever.
    pub ws_response_timeout: Option<Duration>,
    /// Embedding model named in search messages.
    pub model: String,
    /// Global mode sent with paginated searches.
    pub pagination_mode: String,
    /// Broadcast local export additions to peers.
    pub share_exports: bool,
    /// Preference file; in-memory preferences when unset.
    pub preferences_path: Option<PathBuf>,
    pub translate_source: String,
    pub translate_target: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8006".into(),
            http_url: "http://localhost:8006".into(),
            reconnect_delay: Duration::from_millis(5000),
            debounce: Duration::from_millis(300),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            http_timeout: Duration::from_secs(30),
            ws_response_timeout: Some(Duration::from_secs(30)),
            model: "clip".into(),
            pagination_mode: "search".into(),
            share_exports: true,
            preferences_path: None,
            translate_source: "vi".into(),
            translate_target: "en".into(),
        }
    }
}

impl ClientConfig {
    /// Load a `.env` file if present, then read the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                              | Default                 |
    /// |--------------------------------------|-------------------------|
    /// | `FRAMESYNC_WS_URL`                   | `ws://localhost:8006`   |
    /// | `FRAMESYNC_HTTP_URL`                 | `http://localhost:8006` |
    /// | `FRAMESYNC_RECONNECT_DELAY_MS`       | `5000`                  |
    /// | `FRAMESYNC_DEBOUNCE_MS`              | `300`                   |
    /// | `FRAMESYNC_CACHE_CAPACITY`           | `200`                   |
    /// | `FRAMESYNC_HTTP_TIMEOUT_SECS`        | `30`                    |
    /// | `FRAMESYNC_WS_RESPONSE_TIMEOUT_SECS` | `30` (`0` disables)     |
    /// | `FRAMESYNC_MODEL`                    | `clip`                  |
    /// | `FRAMESYNC_PAGINATION_MODE`          | `search`                |
    /// | `FRAMESYNC_SHARE_EXPORTS`            | `true`                  |
    /// | `FRAMESYNC_PREFERENCES_PATH`         | unset                   |
    /// | `FRAMESYNC_TRANSLATE_SOURCE`         | `vi`                    |
    /// | `FRAMESYNC_TRANSLATE_TARGET`         | `en`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string = |name: &str, default: String| lookup(name).unwrap_or(default);

        let ws_response_timeout_secs: u64 =
            parse(&lookup, "FRAMESYNC_WS_RESPONSE_TIMEOUT_SECS", 30)?;
        let reconnect_delay_ms: u64 = parse(&lookup, "FRAMESYNC_RECONNECT_DELAY_MS", 5000)?;

        Ok(Self {
            ws_url: string("FRAMESYNC_WS_URL", defaults.ws_url),
            http_url: string("FRAMESYNC_HTTP_URL", defaults.http_url),
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            debounce: Duration::from_millis(parse(&lookup, "FRAMESYNC_DEBOUNCE_MS", 300)?),
            cache_capacity: parse(&lookup, "FRAMESYNC_CACHE_CAPACITY", defaults.cache_capacity)?,
            http_timeout: Duration::from_secs(parse(&lookup, "FRAMESYNC_HTTP_TIMEOUT_SECS", 30)?),
            ws_response_timeout: (ws_response_timeout_secs > 0)
                .then(|| Duration::from_secs(ws_response_timeout_secs)),
            model: string("FRAMESYNC_MODEL", defaults.model),
            pagination_mode: string("FRAMESYNC_PAGINATION_MODE", defaults.pagination_mode),
            share_exports: parse(&lookup, "FRAMESYNC_SHARE_EXPORTS", defaults.share_exports)?,
            preferences_path: lookup("FRAMESYNC_PREFERENCES_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            translate_source: string("FRAMESYNC_TRANSLATE_SOURCE", defaults.translate_source),
            translate_target: string("FRAMESYNC_TRANSLATE_TARGET", defaults.translate_target),
        })
    }
}

fn parse<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}
