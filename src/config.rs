//! Runtime configuration for the CAROL client.
//!
//! Mirrors the shape `aerolithdb-cli::config` uses for its own settings:
//! sane hardcoded defaults, each overridable by an environment variable, no
//! config file to validate or generate.

use std::env;
use std::time::Duration;

/// Inclusive bounds of the `Event.ID` primary-key universe.
pub const KEY_MIN: i64 = 0;
pub const KEY_MAX: i64 = 200_000;

/// Segment stride used by both the AND and OR partitioning algorithms.
pub const SEG: i64 = 400;

/// Result-count ceiling above which a query must be partitioned.
pub const MAX_ONE_REQUEST: u64 = 3500;

#[derive(Debug, Clone)]
pub struct Config {
    pub probe_url: String,
    pub export_url: String,
    pub probe_session_id: i64,
    pub export_session_id: i64,
    pub request_timeout: Duration,
    pub probe_pacing: Duration,
    pub export_pacing: Duration,
    pub output_dir: String,
    pub user_agent: String,
    pub worker_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            probe_url: env_or(
                "CAROL_PROBE_URL",
                "https://data.ntsb.gov/carol-main-public/api/Query/Main",
            ),
            export_url: env_or(
                "CAROL_EXPORT_URL",
                "https://data.ntsb.gov/carol-main-public/api/Query/FileExport",
            ),
            probe_session_id: env_or("CAROL_PROBE_SESSION_ID", "100000")
                .parse()
                .unwrap_or(100_000),
            export_session_id: env_or("CAROL_EXPORT_SESSION_ID", "100100")
                .parse()
                .unwrap_or(100_100),
            request_timeout: Duration::from_secs(
                env_or("CAROL_REQUEST_TIMEOUT_SECS", "60").parse().unwrap_or(60),
            ),
            probe_pacing: Duration::from_secs(
                env_or("CAROL_PROBE_PACING_SECS", "2").parse().unwrap_or(2),
            ),
            export_pacing: Duration::from_secs(
                env_or("CAROL_EXPORT_PACING_SECS", "5").parse().unwrap_or(5),
            ),
            output_dir: env_or("CAROL_OUTPUT_DIR", "./output"),
            user_agent: env_or(
                "CAROL_USER_AGENT",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
            ),
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.probe_session_id, 100_000);
        assert_eq!(cfg.export_session_id, 100_100);
        assert_eq!(cfg.probe_pacing, Duration::from_secs(2));
        assert_eq!(cfg.export_pacing, Duration::from_secs(5));
        assert_eq!(cfg.request_timeout, Duration::from_secs(60));
    }
}
