//! Environment variable overrides

use std::env;
use tracing::warn;

use crate::config::mirror::MirrorConfig;

/// Apply `LINUX_MIRRORS_*` overrides from the process environment
pub fn apply_overrides(config: &mut MirrorConfig) {
    apply_overrides_from(config, |key| env::var(key).ok());
}

/// Apply overrides using `lookup` as the variable source
pub fn apply_overrides_from<F>(config: &mut MirrorConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(runtime) = lookup("LINUX_MIRRORS_RUNTIME").filter(|v| !v.trim().is_empty()) {
        config.container_runtime = runtime;
    }

    if let Some(secs) = parse_var(&lookup, "LINUX_MIRRORS_POLL_INTERVAL_SECS") {
        config.poll_interval_secs = secs;
    }

    if let Some(value) = lookup("LINUX_MIRRORS_SYNC_TIMEOUT_SECS") {
        // 0 or empty disables the deadline
        config.sync_timeout_secs = match value.trim().parse::<u64>() {
            Ok(0) => None,
            Ok(secs) => Some(secs),
            Err(_) if value.trim().is_empty() => None,
            Err(_) => {
                warn!(value = %value, "Ignoring invalid LINUX_MIRRORS_SYNC_TIMEOUT_SECS");
                config.sync_timeout_secs
            }
        };
    }

    if let Some(n) = parse_var(&lookup, "LINUX_MIRRORS_MAX_CONCURRENT_SYNCS") {
        config.max_concurrent_syncs = n;
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let value = lookup(key)?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key = key, value = %value, "Ignoring unparsable environment override");
            None
        }
    }
}

/// Constants
pub mod constants {
    /// Interval between container status polls (seconds)
    pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

    /// Timeout for a single runtime CLI call (seconds)
    pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 600;

    /// Timeout for an image build (seconds)
    pub const BUILD_TIMEOUT_SECS: u64 = 3600;

    /// YUM admission pool size
    pub const DEFAULT_MAX_CONCURRENT_SYNCS: usize = 3;

    /// Grace period before the runtime kills a stopped container (seconds)
    pub const STOP_TIMEOUT_SECS: u64 = 10;

    /// Lines of container log captured into a result
    pub const DEFAULT_LOG_TAIL: usize = 100;

    /// Head start given to YUM jobs before APT work begins (milliseconds)
    pub const YUM_DISPATCH_DELAY_MS: u64 = 100;

    /// Prefix of every container and image this tool creates
    pub const CONTAINER_NAME_PREFIX: &str = "linux-mirror-";

    /// Mount point of the distribution mirror inside the container
    pub const CONTAINER_MIRROR_PATH: &str = "/mirror";

    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
