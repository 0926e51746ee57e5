use once_cell::sync::Lazy;
use std::{env, time::Duration};

/// Holds all tunables, read-once from ENV with fallbacks.
pub struct Settings {
    pub event_buffer_capacity: usize,
    pub streaming_buffer_capacity: usize,
    pub inactivity_timeout: Duration,
    pub request_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max_attempts: u32,
    pub backoff_long_period: Duration,
    pub backoff_jitter: f32,
    pub progress_debounce: Duration,
    pub resume_floor_secs: f64,
    pub watched_threshold: f64,
    pub skip_cooldown: Duration,
    pub skip_end_margin_secs: f64,
}

impl Settings {
    fn from_env() -> Self {
        // optionally load .env
        let _ = dotenvy::dotenv();

        fn parse_usize(var: &str, default: usize) -> usize {
            env::var(var)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        fn parse_u32(var: &str, default: u32) -> u32 {
            env::var(var)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        fn parse_f64(var: &str, default: f64) -> f64 {
            env::var(var)
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(default)
        }

        // helper to parse seconds into Duration
        fn parse_secs(var: &str, default_secs: u64) -> Duration {
            env::var(var)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_secs(default_secs))
        }

        // helper to parse millis into Duration
        fn parse_millis(var: &str, default_ms: u64) -> Duration {
            env::var(var)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or_else(|| Duration::from_millis(default_ms))
        }

        Settings {
            event_buffer_capacity: parse_usize("SYNC_EVENT_BUFFER_CAPACITY", 256),
            streaming_buffer_capacity: parse_usize("SYNC_STREAM_BUFFER_CAPACITY", 16 * 1024),
            inactivity_timeout: parse_secs("SYNC_INACTIVITY_TIMEOUT_SECS", 45),
            request_timeout: parse_secs("SYNC_REQUEST_TIMEOUT_SECS", 10),
            backoff_base: parse_millis("SYNC_BACKOFF_BASE_MS", 1_000),
            backoff_max_attempts: parse_u32("SYNC_BACKOFF_MAX_ATTEMPTS", 5).max(1),
            backoff_long_period: parse_secs("SYNC_BACKOFF_LONG_PERIOD_SECS", 30),
            backoff_jitter: parse_f64("SYNC_BACKOFF_JITTER", 0.0).min(1.0) as f32,
            progress_debounce: parse_millis("PROGRESS_DEBOUNCE_MS", 2_000),
            resume_floor_secs: parse_f64("PROGRESS_RESUME_FLOOR_SECS", 60.0),
            watched_threshold: parse_f64("PROGRESS_WATCHED_THRESHOLD", 0.9).min(1.0),
            skip_cooldown: parse_millis("SKIP_COOLDOWN_MS", 3_000),
            skip_end_margin_secs: parse_f64("SKIP_END_MARGIN_SECS", 1.0),
        }
    }
}

/// Global settings instance
pub static SETTINGS: Lazy<Settings> = Lazy::new(Settings::from_env);
