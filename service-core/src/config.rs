use std::env;
use std::path::PathBuf;

use serde::Deserialize;

/// Runtime configuration loaded from the environment (`.env`-aware) with
/// sensible defaults, mirroring the existing `Config::from_env` pattern.
/// Fields correspond 1:1 to the key/value configuration surface: `thread`,
/// `harbor`, `profile`, `daemon`, `cpath`, `bootstrap`, `logger`,
/// `logservice`.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Worker thread count.
    pub threads: usize,
    /// Per-worker dispatch weight (§4.5): -1 fair, 0 drain, k>0 -> length>>k.
    pub weight: i32,
    /// Local node id (0-255; 0 means "no cluster routing configured").
    pub harbor: u8,
    /// Enable wall-clock CPU accounting per dispatched message.
    pub profile: bool,
    /// Pidfile path; presence implies daemonizing (unsupported on this
    /// platform beyond writing the pidfile - no fork/setsid here).
    pub daemon: Option<PathBuf>,
    /// Module search path template; `?` is substituted with the bare module
    /// name when resolving a dynamic library.
    pub cpath: Option<String>,
    /// `"name arg..."` string identifying the first service to launch after
    /// the logger.
    pub bootstrap: String,
    /// Log file path for the bootstrap logger module, if any.
    pub logger: Option<PathBuf>,
    /// Name the logger module registers under.
    pub logservice: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            weight: -1,
            harbor: 0,
            profile: false,
            daemon: None,
            cpath: None,
            bootstrap: "logger bootstrap".to_string(),
            logger: None,
            logservice: "logger".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Self {
            threads: env::var("THREAD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(num_cpus::get),
            weight: env::var("WEIGHT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.weight),
            harbor: env::var("HARBOR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.harbor),
            profile: env::var("PROFILE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.profile),
            daemon: env::var("DAEMON").ok().map(PathBuf::from),
            cpath: env::var("CPATH").ok(),
            bootstrap: env::var("BOOTSTRAP").unwrap_or(defaults.bootstrap),
            logger: env::var("LOGGER").ok().map(PathBuf::from),
            logservice: env::var("LOGSERVICE").unwrap_or(defaults.logservice),
        }
    }

    /// Split `bootstrap` into `(module_name, arg_string)`.
    pub fn bootstrap_parts(&self) -> (&str, &str) {
        match self.bootstrap.split_once(' ') {
            Some((name, arg)) => (name, arg),
            None => (self.bootstrap.as_str(), ""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_parts_splits_on_first_space() {
        let cfg = RuntimeConfig {
            bootstrap: "echo bootstrap extra".to_string(),
            ..RuntimeConfig::default()
        };
        assert_eq!(cfg.bootstrap_parts(), ("echo", "bootstrap extra"));
    }

    #[test]
    fn bootstrap_parts_no_arg() {
        let cfg = RuntimeConfig {
            bootstrap: "echo".to_string(),
            ..RuntimeConfig::default()
        };
        assert_eq!(cfg.bootstrap_parts(), ("echo", ""));
    }
}
