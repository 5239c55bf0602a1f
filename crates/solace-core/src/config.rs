//! Configuration loaded from TOML + `SOLACE_*` environment.
//!
//! Every pipeline tunable lives here so behavior can change without code
//! edits. Precedence: env `SOLACE_CONFIG` path > `config/solace.toml` >
//! serde defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_port() -> u16 {
    8000
}

fn default_token_channel_capacity() -> usize {
    64
}

fn default_audio_channel_capacity() -> usize {
    32
}

fn default_outbound_channel_capacity() -> usize {
    64
}

fn default_boundary_soft_limit() -> usize {
    60
}

fn default_boundary_max_bytes() -> usize {
    150
}

fn default_boundary_idle_ms() -> u64 {
    180
}

fn default_scaffold_read_timeout_ms() -> u64 {
    150
}

fn default_scaffold_cache_ttl_secs() -> u64 {
    300
}

fn default_freshness_guard_secs() -> i64 {
    120
}

fn default_background_weight() -> f32 {
    0.4
}

fn default_dedupe_window_secs() -> u64 {
    600
}

fn default_batch_window_ms() -> u64 {
    250
}

fn default_max_batch_size() -> usize {
    16
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_retry_cap_ms() -> u64 {
    30_000
}

fn default_max_write_attempts() -> u32 {
    5
}

fn default_memory_queue_capacity() -> usize {
    1024
}

fn default_analyzer_min_interval_secs() -> u64 {
    60
}

fn default_analyzer_max_interval_secs() -> u64 {
    300
}

fn default_analyzer_recent_turn_guard_secs() -> i64 {
    5
}

fn default_analyzer_grace_secs() -> i64 {
    300
}

fn default_analyzer_search_limit() -> usize {
    25
}

fn default_vendor_request_timeout_secs() -> u64 {
    15
}

fn default_vendor_stream_timeout_secs() -> u64 {
    60
}

fn default_cleanup_subcall_timeout_ms() -> u64 {
    2_000
}

fn default_slow_consumer_timeout_ms() -> u64 {
    5_000
}

/// Global configuration for the Solace process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolaceConfig {
    /// HTTP port for the gateway.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Capacity of the per-turn LLM token channel.
    #[serde(default = "default_token_channel_capacity")]
    pub token_channel_capacity: usize,
    /// Capacity of the per-turn TTS audio channel.
    #[serde(default = "default_audio_channel_capacity")]
    pub audio_channel_capacity: usize,
    /// Capacity of the per-session outbound event channel.
    #[serde(default = "default_outbound_channel_capacity")]
    pub outbound_channel_capacity: usize,

    /// Clause punctuation flushes the boundary buffer past this many bytes.
    #[serde(default = "default_boundary_soft_limit")]
    pub boundary_soft_limit_bytes: usize,
    /// Hard flush threshold for the boundary buffer.
    #[serde(default = "default_boundary_max_bytes")]
    pub boundary_max_bytes: usize,
    /// Idle flush timer for the boundary buffer, in milliseconds.
    #[serde(default = "default_boundary_idle_ms")]
    pub boundary_idle_ms: u64,

    /// Maximum synchronous wait for scaffold access on the hot path.
    #[serde(default = "default_scaffold_read_timeout_ms")]
    pub scaffold_read_timeout_ms: u64,
    /// Cached scaffolds older than this are served stale and re-warmed.
    #[serde(default = "default_scaffold_cache_ttl_secs")]
    pub scaffold_cache_ttl_secs: u64,
    /// Realtime entries younger than this are merged with, never replaced
    /// by, background analysis.
    #[serde(default = "default_freshness_guard_secs")]
    pub freshness_guard_secs: i64,
    /// Weight of the background side in merged numeric scaffold fields.
    #[serde(default = "default_background_weight")]
    pub background_weight: f32,

    /// Window in which an equal dedupe hash drops a memory operation.
    #[serde(default = "default_dedupe_window_secs")]
    pub dedupe_window_secs: u64,
    /// Coalescing window for memory operations of one `(user, kind)`.
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,
    /// Maximum operations per coalesced vendor call.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// First retry delay for failed memory writes.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Retry delay ceiling.
    #[serde(default = "default_retry_cap_ms")]
    pub retry_cap_ms: u64,
    /// Attempts before a memory operation is logged and dropped.
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,
    /// Capacity of the memory writer queue.
    #[serde(default = "default_memory_queue_capacity")]
    pub memory_queue_capacity: usize,

    /// Lower bound of the adaptive analyzer interval.
    #[serde(default = "default_analyzer_min_interval_secs")]
    pub analyzer_min_interval_secs: u64,
    /// Upper bound of the adaptive analyzer interval.
    #[serde(default = "default_analyzer_max_interval_secs")]
    pub analyzer_max_interval_secs: u64,
    /// A turn finishing within this window skips the analyzer cycle.
    #[serde(default = "default_analyzer_recent_turn_guard_secs")]
    pub analyzer_recent_turn_guard_secs: i64,
    /// The analyzer stops after the user has had no sessions for this long.
    #[serde(default = "default_analyzer_grace_secs")]
    pub analyzer_grace_secs: i64,
    /// Result limit per analyzer semantic search.
    #[serde(default = "default_analyzer_search_limit")]
    pub analyzer_search_limit: usize,

    /// Deadline for a vendor request to start responding.
    #[serde(default = "default_vendor_request_timeout_secs")]
    pub vendor_request_timeout_secs: u64,
    /// Deadline for a full vendor stream.
    #[serde(default = "default_vendor_stream_timeout_secs")]
    pub vendor_stream_timeout_secs: u64,
    /// Bound on each potentially blocking cleanup subcall.
    #[serde(default = "default_cleanup_subcall_timeout_ms")]
    pub cleanup_subcall_timeout_ms: u64,
    /// An outbound audio send exceeding this fails the turn as slow_consumer.
    #[serde(default = "default_slow_consumer_timeout_ms")]
    pub slow_consumer_timeout_ms: u64,
}

impl Default for SolaceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            token_channel_capacity: default_token_channel_capacity(),
            audio_channel_capacity: default_audio_channel_capacity(),
            outbound_channel_capacity: default_outbound_channel_capacity(),
            boundary_soft_limit_bytes: default_boundary_soft_limit(),
            boundary_max_bytes: default_boundary_max_bytes(),
            boundary_idle_ms: default_boundary_idle_ms(),
            scaffold_read_timeout_ms: default_scaffold_read_timeout_ms(),
            scaffold_cache_ttl_secs: default_scaffold_cache_ttl_secs(),
            freshness_guard_secs: default_freshness_guard_secs(),
            background_weight: default_background_weight(),
            dedupe_window_secs: default_dedupe_window_secs(),
            batch_window_ms: default_batch_window_ms(),
            max_batch_size: default_max_batch_size(),
            retry_base_ms: default_retry_base_ms(),
            retry_cap_ms: default_retry_cap_ms(),
            max_write_attempts: default_max_write_attempts(),
            memory_queue_capacity: default_memory_queue_capacity(),
            analyzer_min_interval_secs: default_analyzer_min_interval_secs(),
            analyzer_max_interval_secs: default_analyzer_max_interval_secs(),
            analyzer_recent_turn_guard_secs: default_analyzer_recent_turn_guard_secs(),
            analyzer_grace_secs: default_analyzer_grace_secs(),
            analyzer_search_limit: default_analyzer_search_limit(),
            vendor_request_timeout_secs: default_vendor_request_timeout_secs(),
            vendor_stream_timeout_secs: default_vendor_stream_timeout_secs(),
            cleanup_subcall_timeout_ms: default_cleanup_subcall_timeout_ms(),
            slow_consumer_timeout_ms: default_slow_consumer_timeout_ms(),
        }
    }
}

impl SolaceConfig {
    /// Load config from file and environment.
    /// Precedence: env `SOLACE_CONFIG` path > `config/solace.toml` > defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("SOLACE_CONFIG").unwrap_or_else(|_| "config/solace".to_string());
        let builder = config::Config::builder();

        let path = Path::new(&config_path);
        let builder = if path.exists() || Path::new(&format!("{config_path}.toml")).exists() {
            builder.add_source(config::File::with_name(&config_path))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("SOLACE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        built.try_deserialize()
    }

    pub fn boundary_idle(&self) -> Duration {
        Duration::from_millis(self.boundary_idle_ms)
    }

    pub fn scaffold_read_timeout(&self) -> Duration {
        Duration::from_millis(self.scaffold_read_timeout_ms)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn dedupe_window(&self) -> Duration {
        Duration::from_secs(self.dedupe_window_secs)
    }

    pub fn vendor_request_timeout(&self) -> Duration {
        Duration::from_secs(self.vendor_request_timeout_secs)
    }

    pub fn vendor_stream_timeout(&self) -> Duration {
        Duration::from_secs(self.vendor_stream_timeout_secs)
    }

    pub fn cleanup_subcall_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_subcall_timeout_ms)
    }

    pub fn slow_consumer_timeout(&self) -> Duration {
        Duration::from_millis(self.slow_consumer_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_suggestions() {
        let cfg = SolaceConfig::default();
        assert_eq!(cfg.token_channel_capacity, 64);
        assert_eq!(cfg.audio_channel_capacity, 32);
        assert_eq!(cfg.boundary_soft_limit_bytes, 60);
        assert_eq!(cfg.boundary_idle_ms, 180);
        assert_eq!(cfg.scaffold_read_timeout_ms, 150);
        assert_eq!(cfg.freshness_guard_secs, 120);
        assert_eq!(cfg.dedupe_window_secs, 600);
        assert_eq!(cfg.max_batch_size, 16);
        assert_eq!(cfg.max_write_attempts, 5);
    }

    #[test]
    fn duration_helpers() {
        let cfg = SolaceConfig::default();
        assert_eq!(cfg.batch_window(), Duration::from_millis(250));
        assert_eq!(cfg.vendor_request_timeout(), Duration::from_secs(15));
    }
}
