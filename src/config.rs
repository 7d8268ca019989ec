use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::credentials::{default_ttl, DEFAULT_TTL_DAYS};
use crate::models::DEFAULT_MODEL;

/// Bounded polling policy: up to `max_attempts` checks, `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self { max_attempts, interval }
    }
}

impl Default for RetryPolicy {
    /// Ten checks half a second apart: long enough for a freshly stored login token to show up.
    fn default() -> Self {
        Self::new(10, Duration::from_millis(500))
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    pub connect_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub typing_debounce: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:5000/ws".to_string(),
            connect_timeout: Duration::from_secs(20),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
            typing_debounce: Duration::from_millis(1000),
        }
    }
}

/// Where assistant replies come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    /// Canned keyword responder with an artificial typing delay.
    Offline { delay: Duration },
    /// Backend replies: streamed over the event stream when connected, REST otherwise.
    Server,
}

impl Default for ReplyMode {
    fn default() -> Self {
        ReplyMode::Offline { delay: Duration::from_millis(1000) }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub default_model: String,
    pub token_poll: RetryPolicy,
    pub reply_mode: ReplyMode,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            token_poll: RetryPolicy::default(),
            reply_mode: ReplyMode::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CredentialConfig {
    pub path: PathBuf,
    pub ttl: chrono::Duration,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self { path: default_credentials_path(), ttl: default_ttl() }
    }
}

fn default_credentials_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ai-chat-client")
        .join("credentials.json")
}

/// Everything the client needs to talk to one backend deployment.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub stream: StreamConfig,
    pub coordinator: CoordinatorConfig,
    pub credentials: CredentialConfig,
}

impl ClientConfig {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset keys keep their defaults and unparseable ones are
    /// logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = ClientConfig::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api = ApiConfig {
            base_url: get("API_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api.base_url),
            timeout: secs(&get, "REQUEST_TIMEOUT_SECS", defaults.api.timeout),
        };

        let stream = StreamConfig {
            url: get("STREAM_URL").unwrap_or(defaults.stream.url),
            connect_timeout: secs(&get, "STREAM_CONNECT_TIMEOUT_SECS", defaults.stream.connect_timeout),
            max_reconnect_attempts: parsed(
                &get,
                "STREAM_RECONNECT_ATTEMPTS",
                defaults.stream.max_reconnect_attempts,
            ),
            reconnect_delay: millis(&get, "STREAM_RECONNECT_DELAY_MS", defaults.stream.reconnect_delay),
            typing_debounce: millis(&get, "TYPING_DEBOUNCE_MS", defaults.stream.typing_debounce),
        };

        let reply_delay = millis(&get, "REPLY_DELAY_MS", Duration::from_millis(1000));
        let reply_mode = match get("REPLY_MODE").map(|m| m.to_lowercase()).as_deref() {
            None | Some("offline") => ReplyMode::Offline { delay: reply_delay },
            Some("server") => ReplyMode::Server,
            Some(other) => {
                warn!("Unknown REPLY_MODE '{other}', falling back to offline replies");
                ReplyMode::Offline { delay: reply_delay }
            }
        };

        let coordinator = CoordinatorConfig {
            default_model: get("DEFAULT_MODEL").unwrap_or(defaults.coordinator.default_model),
            token_poll: RetryPolicy::new(
                parsed(&get, "TOKEN_POLL_ATTEMPTS", defaults.coordinator.token_poll.max_attempts),
                millis(&get, "TOKEN_POLL_INTERVAL_MS", defaults.coordinator.token_poll.interval),
            ),
            reply_mode,
        };

        let credentials = CredentialConfig {
            path: get("CREDENTIALS_PATH").map(PathBuf::from).unwrap_or(defaults.credentials.path),
            ttl: token_ttl(&get),
        };

        Self { api, stream, coordinator, credentials }
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match get(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring unparseable {key}='{raw}'");
            default
        }),
    }
}

/// Positive whole days whose expiry is still a representable timestamp.
fn token_ttl(get: &impl Fn(&str) -> Option<String>) -> chrono::Duration {
    let days = parsed(get, "TOKEN_TTL_DAYS", DEFAULT_TTL_DAYS);
    match chrono::Duration::try_days(days) {
        Some(ttl) if days > 0 && chrono::Utc::now().checked_add_signed(ttl).is_some() => ttl,
        _ => {
            warn!("Ignoring out-of-range TOKEN_TTL_DAYS={days}");
            default_ttl()
        }
    }
}

fn millis(get: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    Duration::from_millis(parsed(get, key, default.as_millis() as u64))
}

fn secs(get: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    Duration::from_secs(parsed(get, key, default.as_secs()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> ClientConfig {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.api.base_url, "http://localhost:5000");
        assert_eq!(config.api.timeout, Duration::from_secs(30));
        assert_eq!(config.stream.max_reconnect_attempts, 5);
        assert_eq!(config.stream.typing_debounce, Duration::from_secs(1));
        assert_eq!(config.coordinator.token_poll, RetryPolicy::default());
        assert_eq!(config.coordinator.default_model, "gpt-4o-mini");
        assert_eq!(
            config.coordinator.reply_mode,
            ReplyMode::Offline { delay: Duration::from_millis(1000) }
        );
        assert_eq!(config.credentials.ttl, chrono::Duration::days(7));
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("API_BASE_URL", "https://chat.example.com/"),
            ("STREAM_RECONNECT_ATTEMPTS", "2"),
            ("TOKEN_POLL_ATTEMPTS", "3"),
            ("TOKEN_POLL_INTERVAL_MS", "20"),
            ("REPLY_MODE", "server"),
            ("CREDENTIALS_PATH", "/tmp/creds.json"),
        ]);
        assert_eq!(config.api.base_url, "https://chat.example.com");
        assert_eq!(config.stream.max_reconnect_attempts, 2);
        assert_eq!(
            config.coordinator.token_poll,
            RetryPolicy::new(3, Duration::from_millis(20))
        );
        assert_eq!(config.coordinator.reply_mode, ReplyMode::Server);
        assert_eq!(config.credentials.path, PathBuf::from("/tmp/creds.json"));
    }

    #[test]
    fn garbage_values_fall_back_to_defaults() {
        let config = config_from(&[
            ("REQUEST_TIMEOUT_SECS", "soon"),
            ("REPLY_MODE", "psychic"),
            ("REPLY_DELAY_MS", "5"),
        ]);
        assert_eq!(config.api.timeout, Duration::from_secs(30));
        assert_eq!(
            config.coordinator.reply_mode,
            ReplyMode::Offline { delay: Duration::from_millis(5) }
        );
    }

    #[test]
    fn token_lifetime_is_validated() {
        let ttl = |raw: &str| config_from(&[("TOKEN_TTL_DAYS", raw)]).credentials.ttl;
        assert_eq!(ttl("30"), chrono::Duration::days(30));
        assert_eq!(ttl("9223372036854775807"), chrono::Duration::days(7));
        assert_eq!(ttl("100000000"), chrono::Duration::days(7));
        assert_eq!(ttl("0"), chrono::Duration::days(7));
        assert_eq!(ttl("-3"), chrono::Duration::days(7));
        assert_eq!(ttl("a week"), chrono::Duration::days(7));
    }
}
