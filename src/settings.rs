//! Tunable parameters for the routing table and the bucket refresher.
//!
//! Nothing in the algorithms is hardcoded; both components take their settings
//! at construction so embedders can plug in persisted configuration.

use std::time::Duration;

/// Parameters governing bucket capacity, failure classification and splitting.
#[derive(Debug, Clone)]
pub struct RouteTableSettings {
    /// The replication parameter K: the maximum number of active contacts per bucket.
    pub k: usize,
    /// The maximum number of contacts held in a bucket's replacement cache.
    pub max_cache_size: usize,
    /// Failures after which a contact that has been alive before is considered dead.
    pub max_alive_failures: u32,
    /// Failures after which a contact that was never alive is considered dead.
    /// Smaller than `max_alive_failures`: unverified peers get less benefit of
    /// the doubt than previously-trusted ones.
    pub max_unknown_failures: u32,
    /// Failures accepted in a row (without an intervening successful `add`)
    /// before further failures are ignored as a local network outage.
    pub max_consecutive_failures: u32,
    /// A contact whose last success is younger than this counts as recently alive.
    pub min_reconnection_time: Duration,
    /// Age of a bucket's last refresh beyond which it becomes a refresh target.
    pub bucket_refresh_interval: Duration,
    /// Symbol size for the split relaxation: non-local buckets may split while
    /// their depth is not a multiple of this value.
    pub depth_limit: usize,
    /// Whether private/LAN source addresses may overwrite an advertised
    /// contact address.
    pub accept_private_addresses: bool,
    /// Lower clamp for the RTT-derived adaptive timeout.
    pub min_rtt_timeout: Duration,
    /// Multiplier applied to a contact's RTT when deriving its adaptive timeout.
    pub rtt_factor: u32,
    /// Timeout used when a contact has no usable RTT history.
    pub default_timeout: Duration,
}

impl Default for RouteTableSettings {
    fn default() -> Self {
        Self {
            k: 20,
            max_cache_size: 16,
            max_alive_failures: 4,
            max_unknown_failures: 2,
            max_consecutive_failures: 100,
            min_reconnection_time: Duration::from_secs(60),
            bucket_refresh_interval: Duration::from_secs(30 * 60),
            depth_limit: 4,
            accept_private_addresses: false,
            min_rtt_timeout: Duration::from_secs(1),
            rtt_factor: 2,
            default_timeout: Duration::from_secs(10),
        }
    }
}

/// Parameters governing the refresher's schedule and its two phases.
#[derive(Debug, Clone)]
pub struct RefresherSettings {
    /// Fixed delay between refresh ticks.
    pub frequency: Duration,
    /// Only contacts not heard from for at least this long are pinged during
    /// the ping phase; zero disables the phase entirely.
    pub ping_nearest: Duration,
    /// Default timeout for a single ping.
    pub ping_timeout: Duration,
    /// Default timeout for a single lookup.
    pub lookup_timeout: Duration,
}

impl Default for RefresherSettings {
    fn default() -> Self {
        Self {
            frequency: Duration::from_secs(5 * 60),
            ping_nearest: Duration::from_secs(5 * 60),
            ping_timeout: Duration::from_secs(10),
            lookup_timeout: Duration::from_secs(90),
        }
    }
}
