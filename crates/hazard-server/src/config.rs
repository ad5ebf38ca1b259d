//! Server configuration from environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use hazard_core::{AlertRules, AlertScale, ClusterRules, PresenceRules};

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_path: String,
    pub database_max_connections: u32,
    /// Shared cache tier. Local-only caching when unset.
    pub redis_url: Option<String>,
    pub local_cache_ttl: Duration,
    pub presence_cache_ttl: Duration,
    pub report_cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub cache_prune_interval: Duration,
    pub min_zoom: f64,
    pub stale_after_secs: u64,
    pub expire_after_secs: u64,
    pub sweep_interval: Duration,
    pub cluster_radius_m: f64,
    pub alert_scale: AlertScale,
    pub warning_buffer_m: f64,
    pub low_buffer_m: f64,
    pub hysteresis_m: f64,
    /// External JSON report source. Reports come from SQLite when unset.
    pub report_source_url: Option<String>,
    pub viewport_debounce: Duration,
    pub hazard_refresh_interval: Duration,
    /// `/v1/feed` of a peer instance sharing the same database.
    pub peer_feed_url: Option<String>,
    /// Entity id this instance shares its own position as.
    pub local_entity_id: String,
    pub sim_center_lat: Option<f64>,
    pub sim_center_lng: Option<f64>,
    pub sim_radius_m: f64,
    pub sim_speed_mps: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            database_path: "data/hazard.db".to_string(),
            database_max_connections: 5,
            redis_url: None,
            local_cache_ttl: Duration::from_secs(5),
            presence_cache_ttl: Duration::from_secs(2),
            report_cache_ttl: Duration::from_secs(30),
            cache_max_entries: 10_000,
            cache_prune_interval: Duration::from_secs(30),
            min_zoom: 12.0,
            stale_after_secs: 30,
            expire_after_secs: 120,
            sweep_interval: Duration::from_secs(10),
            cluster_radius_m: 300.0,
            alert_scale: AlertScale::FourLevel,
            warning_buffer_m: 200.0,
            low_buffer_m: 400.0,
            hysteresis_m: 25.0,
            report_source_url: None,
            viewport_debounce: Duration::from_millis(400),
            hazard_refresh_interval: Duration::from_secs(30),
            peer_feed_url: None,
            local_entity_id: "hazard-server".to_string(),
            sim_center_lat: None,
            sim_center_lng: None,
            sim_radius_m: 150.0,
            sim_speed_mps: 1.4,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: parsed("HAZARD_PORT").unwrap_or(defaults.server_port),
            database_path: env::var("HAZARD_DB_PATH").unwrap_or(defaults.database_path),
            database_max_connections: parsed("HAZARD_DB_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            redis_url: non_empty("HAZARD_REDIS_URL"),
            local_cache_ttl: millis("HAZARD_LOCAL_CACHE_TTL_MS").unwrap_or(defaults.local_cache_ttl),
            presence_cache_ttl: millis("HAZARD_PRESENCE_CACHE_TTL_MS")
                .unwrap_or(defaults.presence_cache_ttl),
            report_cache_ttl: millis("HAZARD_REPORT_CACHE_TTL_MS")
                .unwrap_or(defaults.report_cache_ttl),
            cache_max_entries: parsed("HAZARD_CACHE_MAX_ENTRIES")
                .unwrap_or(defaults.cache_max_entries),
            cache_prune_interval: secs("HAZARD_CACHE_PRUNE_SECS")
                .unwrap_or(defaults.cache_prune_interval),
            min_zoom: parsed("HAZARD_MIN_ZOOM").unwrap_or(defaults.min_zoom),
            stale_after_secs: parsed("HAZARD_STALE_AFTER_SECS").unwrap_or(defaults.stale_after_secs),
            expire_after_secs: parsed("HAZARD_EXPIRE_AFTER_SECS")
                .unwrap_or(defaults.expire_after_secs),
            sweep_interval: secs("HAZARD_SWEEP_SECS").unwrap_or(defaults.sweep_interval),
            cluster_radius_m: parsed("HAZARD_CLUSTER_RADIUS_M").unwrap_or(defaults.cluster_radius_m),
            alert_scale: env::var("HAZARD_ALERT_SCALE")
                .ok()
                .and_then(|s| AlertScale::parse(&s))
                .unwrap_or(defaults.alert_scale),
            warning_buffer_m: parsed("HAZARD_WARNING_BUFFER_M").unwrap_or(defaults.warning_buffer_m),
            low_buffer_m: parsed("HAZARD_LOW_BUFFER_M").unwrap_or(defaults.low_buffer_m),
            hysteresis_m: parsed("HAZARD_HYSTERESIS_M").unwrap_or(defaults.hysteresis_m),
            report_source_url: non_empty("HAZARD_REPORT_SOURCE_URL"),
            viewport_debounce: millis("HAZARD_VIEWPORT_DEBOUNCE_MS")
                .unwrap_or(defaults.viewport_debounce),
            hazard_refresh_interval: secs("HAZARD_REFRESH_SECS")
                .unwrap_or(defaults.hazard_refresh_interval),
            peer_feed_url: non_empty("HAZARD_PEER_FEED_URL"),
            local_entity_id: non_empty("HAZARD_ENTITY_ID").unwrap_or(defaults.local_entity_id),
            sim_center_lat: parsed("HAZARD_SIM_LAT"),
            sim_center_lng: parsed("HAZARD_SIM_LNG"),
            sim_radius_m: parsed("HAZARD_SIM_RADIUS_M").unwrap_or(defaults.sim_radius_m),
            sim_speed_mps: parsed("HAZARD_SIM_SPEED_MPS").unwrap_or(defaults.sim_speed_mps),
        }
    }

    pub fn cluster_rules(&self) -> ClusterRules {
        ClusterRules {
            cluster_radius_m: self.cluster_radius_m,
            ..ClusterRules::default()
        }
    }

    pub fn alert_rules(&self) -> AlertRules {
        AlertRules {
            scale: self.alert_scale,
            warning_buffer_m: self.warning_buffer_m,
            low_buffer_m: self.low_buffer_m,
            hysteresis_m: self.hysteresis_m,
        }
    }

    pub fn presence_rules(&self) -> PresenceRules {
        PresenceRules {
            min_zoom: self.min_zoom,
            stale_after_secs: self.stale_after_secs,
            expire_after_secs: self.expire_after_secs.max(self.stale_after_secs),
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parsed<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn millis(key: &str) -> Option<Duration> {
    parsed::<u64>(key).map(Duration::from_millis)
}

fn secs(key: &str) -> Option<Duration> {
    parsed::<u64>(key).map(Duration::from_secs)
}
