//! Metric names
//!
//! Recorded through the `metrics` facade; installing an exporter is up to
//! the host application.

pub mod names {
    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "dirauth_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "dirauth_cache_misses_total";
    pub const CACHE_EVICTIONS_TOTAL: &str = "dirauth_cache_evictions_total";

    // Session metrics
    pub const CONNECT_ATTEMPTS_TOTAL: &str = "dirauth_connect_attempts_total";
    pub const SERVER_BLACKLISTED_TOTAL: &str = "dirauth_server_blacklisted_total";
    pub const SEARCH_PAGES_TOTAL: &str = "dirauth_search_pages_total";

    // Authentication metrics
    pub const LOGINS_TOTAL: &str = "dirauth_logins_total";
}
