use crate::websocket::ReconnectPolicy;
use serde::Deserialize;
use std::time::Duration;

pub const ENV_PREFIX: &str = "POLL_LIVE_";

/// Runtime settings, read from `POLL_LIVE_*` environment variables.
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub rest_url: String,
    #[serde(default)]
    pub realtime_url: Option<String>,
    pub api_key: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_store_path() -> String {
    "poll-live-store.json".to_owned()
}

const fn default_request_timeout_secs() -> u64 {
    10
}

const fn default_reconnect_delay_secs() -> u64 {
    5
}

const fn default_max_reconnect_attempts() -> u32 {
    10
}

const fn default_heartbeat_secs() -> u64 {
    30
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed(ENV_PREFIX).from_env::<Self>()
    }

    /// Explicit realtime URL, or the REST host with a websocket scheme.
    pub fn realtime_url(&self) -> String {
        if let Some(url) = &self.realtime_url {
            return url.clone();
        }
        let base = self.rest_url.trim_end_matches('/');
        let ws_base = base.replacen("http", "ws", 1);
        format!("{}/realtime/v1/websocket", ws_base)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_secs(self.reconnect_delay_secs),
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply() {
        let config: Config = envy::from_iter(vars(&[
            ("REST_URL", "https://db.example.com"),
            ("API_KEY", "anon"),
        ]))
        .unwrap();

        assert_eq!(config.store_path, "poll-live-store.json");
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.reconnect_policy(), ReconnectPolicy::default());
        assert_eq!(config.heartbeat(), Duration::from_secs(30));
        assert!(config.user_id.is_none());
    }

    #[test]
    fn realtime_url_derived_from_rest_url() {
        let config: Config = envy::from_iter(vars(&[
            ("REST_URL", "https://db.example.com/"),
            ("API_KEY", "anon"),
        ]))
        .unwrap();
        assert_eq!(
            config.realtime_url(),
            "wss://db.example.com/realtime/v1/websocket"
        );

        let explicit: Config = envy::from_iter(vars(&[
            ("REST_URL", "https://db.example.com"),
            ("REALTIME_URL", "ws://localhost:4000/socket"),
            ("API_KEY", "anon"),
            ("MAX_RECONNECT_ATTEMPTS", "3"),
        ]))
        .unwrap();
        assert_eq!(explicit.realtime_url(), "ws://localhost:4000/socket");
        assert_eq!(explicit.reconnect_policy().max_attempts, 3);
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let result: Result<Config, _> =
            envy::from_iter(vars(&[("REST_URL", "https://db.example.com")]));
        assert!(result.is_err());
    }
}
