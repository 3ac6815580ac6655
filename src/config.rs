// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! A single `Config` struct threaded by reference everywhere instead of
//! statics (Design Note 3, spec §9: "a handful of statics... should be
//! threaded through a Config struct created once at init").

use std::time::Duration;

/// Tunables for the pipeline, transfer engine, and sync reconciler.
/// Created once by the host at startup and passed by reference.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL for the `/cs`, `/wsc`, `/sc` endpoints.
    pub api_host: String,
    /// Application key sent on every request.
    pub app_key: String,
    /// `lang` query parameter.
    pub lang: String,
    /// Protocol version (`v` query parameter).
    pub protocol_version: u32,

    /// Initial backoff for transient command/long-poll errors.
    pub backoff_initial: Duration,
    /// Cap on exponential backoff growth.
    pub backoff_max: Duration,
    /// Jitter fraction applied to each backoff delay, e.g. 0.2 for ±20%.
    pub backoff_jitter: f64,

    /// Seconds without bytes on an in-flight request before a lock probe
    /// is issued.
    pub request_inactivity_timeout: Duration,
    /// Long-poll response timeout (server normally responds within 5 of
    /// this budget).
    pub long_poll_timeout: Duration,

    /// Maximum concurrent transfers across both directions.
    pub max_total_transfers: usize,
    /// Maximum concurrent transfers per direction.
    pub max_dir_transfers: usize,
    /// Download connections per transfer slot.
    pub download_connections: usize,
    /// Upload connections per transfer slot.
    pub upload_connections: usize,
    /// Threshold above which a file is "very big" (bytes).
    pub very_big_file_threshold: u64,
    /// Remaining-bytes threshold combined with `very_big_file_threshold`.
    pub very_big_remaining_threshold: u64,
    /// Clamp bounds for the outstanding-bytes admission window.
    pub outstanding_bytes_min: u64,
    pub outstanding_bytes_max: u64,
    /// Multiplier applied to current speed to compute the outstanding
    /// window before clamping.
    pub outstanding_bytes_speed_multiplier: u64,

    /// Temporary transfer URL validity before the first byte must flow.
    pub temp_url_fresh: Duration,
    /// Temporary transfer URL validity before it must be re-requested.
    pub temp_url_max_age: Duration,
    /// Per-connection failure count before it is pulled from RAID rotation.
    pub raid_connection_failure_limit: u32,

    /// How long resumable transfer cache entries are kept before purge.
    pub transfer_cache_retention: Duration,

    /// Sync nagle delay: a changed local file is not uploaded until it
    /// has been stable for this long.
    pub nagle_interval: Duration,
    /// Scan-failure backoff base, added to `total_nodes / 128` seconds.
    pub scan_failure_backoff_base: Duration,

    /// Worker pool size for hashing/encryption/filesystem-scan jobs.
    pub worker_pool_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_host: "https://g.example-api.invalid".to_owned(),
            app_key: String::new(),
            lang: "en".to_owned(),
            protocol_version: 2,

            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            backoff_jitter: 0.2,

            request_inactivity_timeout: Duration::from_secs(60),
            long_poll_timeout: Duration::from_secs(360),

            max_total_transfers: 48,
            max_dir_transfers: 32,
            download_connections: 4,
            upload_connections: 3,
            very_big_file_threshold: 100 * 1024 * 1024,
            very_big_remaining_threshold: 5 * 1024 * 1024,
            outstanding_bytes_min: 2 * 1024 * 1024,
            outstanding_bytes_max: 100 * 1024 * 1024,
            outstanding_bytes_speed_multiplier: 30,

            temp_url_fresh: Duration::from_secs(60),
            temp_url_max_age: Duration::from_secs(600),
            raid_connection_failure_limit: 5,

            transfer_cache_retention: Duration::from_secs(2 * 24 * 3600),

            nagle_interval: Duration::from_secs(4),
            scan_failure_backoff_base: Duration::from_secs(30),

            worker_pool_size: num_cpus_hint(),
        }
    }
}

/// Cheap fallback when the host hasn't told us how many workers to run;
/// avoids pulling in `num_cpus` for a single call site.
fn num_cpus_hint() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_numbers() {
        let cfg = Config::default();
        assert_eq!(cfg.max_total_transfers, 48);
        assert_eq!(cfg.max_dir_transfers, 32);
        assert_eq!(cfg.download_connections, 4);
        assert_eq!(cfg.upload_connections, 3);
    }
}
