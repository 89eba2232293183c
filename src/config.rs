//! Runtime configuration.
//!
//! DESIGN
//! ======
//! Every knob comes from an environment variable with a compiled-in default.
//! Unparsable values fall back to the default instead of aborting startup,
//! so a typo in `.env` degrades to stock behavior rather than a crash loop.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_STATE_FILE: &str = "room_states.json";
const DEFAULT_TIMER_TICK_MS: u64 = 1000;
const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 256;

/// Process-wide settings, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP listener binds to.
    pub bind_addr: String,
    pub port: u16,
    /// Aggregate JSON file holding every room's persisted state.
    pub state_file: PathBuf,
    /// Optional directory served as static files at `/`.
    pub static_dir: Option<PathBuf>,
    /// Period of the timer engine loop.
    pub tick_interval: Duration,
    /// Bound of each connection's outbound queue.
    pub client_queue_capacity: usize,
}

impl Config {
    /// Load configuration from the environment, defaulting missing values.
    #[must_use]
    pub fn from_env() -> Self {
        let bind_addr = std::env::var("BIND_ADDR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned());
        let state_file = std::env::var("STATE_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_STATE_FILE), PathBuf::from);
        let static_dir = std::env::var("STATIC_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        let tick_ms = env_parse("TIMER_TICK_MS", DEFAULT_TIMER_TICK_MS).max(1);

        Self {
            bind_addr,
            port: env_parse("PORT", DEFAULT_PORT),
            state_file,
            static_dir,
            tick_interval: Duration::from_millis(tick_ms),
            client_queue_capacity: env_parse("CLIENT_QUEUE_CAPACITY", DEFAULT_CLIENT_QUEUE_CAPACITY).max(1),
        }
    }

    /// `host:port` string for `TcpListener::bind`.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_owned(),
            port: DEFAULT_PORT,
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            static_dir: None,
            tick_interval: Duration::from_millis(DEFAULT_TIMER_TICK_MS),
            client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
