use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::partition::Service;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn profiled_env_list(profile: &str, key: &str, default: &[&str]) -> Vec<String> {
    match profiled_env_opt(profile, key) {
        Some(v) => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub grid: GridConfig,
    pub source: SourceConfig,
    pub probe: ProbeConfig,
    pub loader: LoaderConfig,
    pub ledger: LedgerConfig,
    pub audit: AuditConfig,
    pub warehouse: WarehouseConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TLC_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("TLC_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            grid: GridConfig::from_env_profiled(p),
            source: SourceConfig::from_env_profiled(p),
            probe: ProbeConfig::from_env_profiled(p),
            loader: LoaderConfig::from_env_profiled(p),
            ledger: LedgerConfig::from_env_profiled(p),
            audit: AuditConfig::from_env_profiled(p),
            warehouse: WarehouseConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  grid:       services={:?}, years={}..={}",
            self.grid.services, self.grid.year_from, self.grid.year_to
        );
        tracing::info!("  source:     base_url={}", self.source.base_url);
        tracing::info!(
            "  probe:      attempts={}, base_delay={}ms, throttle={}ms, concurrency={}",
            self.probe.max_attempts,
            self.probe.base_delay_ms,
            self.probe.throttle_ms,
            self.probe.concurrency
        );
        tracing::info!(
            "  loader:     batch_yellow={}, batch_green={}, staging={}",
            self.loader.batch_size_yellow,
            self.loader.batch_size_green,
            self.loader.staging_dir.display()
        );
        tracing::info!("  ledger:     path={}", self.ledger.coverage_path.display());
        tracing::info!("  audit:      publish_mode={}", self.audit.publish_mode);
        tracing::info!(
            "  warehouse:  host={}, db={}, schema={}",
            self.warehouse.host, self.warehouse.database, self.warehouse.schema
        );
    }
}

// ── Grid ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub services: Vec<Service>,
    pub year_from: i32,
    pub year_to: i32,
}

impl GridConfig {
    fn from_env_profiled(p: &str) -> Self {
        let mut services: Vec<Service> = profiled_env_list(p, "TLC_SERVICES", &["yellow", "green"])
            .iter()
            .filter_map(|s| match s.parse() {
                Ok(svc) => Some(svc),
                Err(e) => {
                    tracing::warn!("ignoring TLC_SERVICES entry: {}", e);
                    None
                }
            })
            .collect();
        if services.is_empty() {
            services = Service::ALL.to_vec();
        }
        Self {
            services,
            year_from: profiled_env_parse(p, "TLC_YEAR_FROM", 2015),
            year_to: profiled_env_parse(p, "TLC_YEAR_TO", 2025),
        }
    }
}

// ── Remote source ─────────────────────────────────────────────

pub const DEFAULT_BASE_URL: &str = "https://d37ci6vzurychx.cloudfront.net/trip-data";

pub const DEFAULT_ZONES_URLS: &[&str] = &[
    "https://d37ci6vzurychx.cloudfront.net/misc/taxi_zone_lookup.csv",
    "https://d37ci6vzurychx.cloudfront.net/misc/taxi+_zone_lookup.csv",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    pub zones_urls: Vec<String>,
    pub user_agent: String,
    pub probe_connect_timeout_secs: u64,
    pub probe_read_timeout_secs: u64,
    pub download_connect_timeout_secs: u64,
    pub download_read_timeout_secs: u64,
}

impl SourceConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            base_url: profiled_env_or(p, "TLC_BASE_URL", DEFAULT_BASE_URL),
            zones_urls: profiled_env_list(p, "TLC_ZONES_URLS", DEFAULT_ZONES_URLS),
            user_agent: profiled_env_or(p, "TLC_USER_AGENT", "tlc-ledger/0.1 (coverage checker)"),
            probe_connect_timeout_secs: profiled_env_parse(p, "TLC_PROBE_CONNECT_TIMEOUT_SECS", 4),
            probe_read_timeout_secs: profiled_env_parse(p, "TLC_PROBE_READ_TIMEOUT_SECS", 15),
            download_connect_timeout_secs: profiled_env_parse(
                p,
                "TLC_DOWNLOAD_CONNECT_TIMEOUT_SECS",
                8,
            ),
            download_read_timeout_secs: profiled_env_parse(p, "TLC_DOWNLOAD_READ_TIMEOUT_SECS", 90),
        }
    }

    pub fn probe_timeouts(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.probe_connect_timeout_secs),
            Duration::from_secs(self.probe_read_timeout_secs),
        )
    }

    pub fn download_timeouts(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.download_connect_timeout_secs),
            Duration::from_secs(self.download_read_timeout_secs),
        )
    }
}

// ── Probe ─────────────────────────────────────────────────────

/// Upper bound on concurrent probe workers.
pub const MAX_PROBE_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub jitter_ms: u64,
    pub throttle_ms: u64,
    pub concurrency: usize,
}

impl ProbeConfig {
    fn from_env_profiled(p: &str) -> Self {
        let concurrency: usize = profiled_env_parse(p, "TLC_PROBE_CONCURRENCY", 1);
        Self {
            max_attempts: profiled_env_parse::<u32>(p, "TLC_PROBE_MAX_ATTEMPTS", 3).max(1),
            base_delay_ms: profiled_env_parse(p, "TLC_PROBE_BASE_DELAY_MS", 500),
            jitter_ms: profiled_env_parse(p, "TLC_PROBE_JITTER_MS", 250),
            throttle_ms: profiled_env_parse(p, "TLC_PROBE_THROTTLE_MS", 200),
            concurrency: concurrency.clamp(1, MAX_PROBE_CONCURRENCY),
        }
    }
}

// ── Loader ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub batch_size_yellow: usize,
    pub batch_size_green: usize,
    pub staging_dir: PathBuf,
    pub load_concurrency: usize,
}

impl LoaderConfig {
    fn from_env_profiled(p: &str) -> Self {
        let staging_dir = profiled_env_opt(p, "TLC_STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);
        Self {
            batch_size_yellow: profiled_env_parse::<usize>(p, "TLC_BATCH_SIZE_YELLOW", 400_000).max(1),
            batch_size_green: profiled_env_parse::<usize>(p, "TLC_BATCH_SIZE_GREEN", 600_000).max(1),
            staging_dir,
            load_concurrency: profiled_env_parse::<usize>(p, "TLC_LOAD_CONCURRENCY", 1).max(1),
        }
    }

    /// Rows per warehouse write for a dataset variant.
    pub fn batch_size(&self, service: Service) -> usize {
        match service {
            Service::Yellow => self.batch_size_yellow,
            Service::Green => self.batch_size_green,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size_yellow: 400_000,
            batch_size_green: 600_000,
            staging_dir: env::temp_dir(),
            load_concurrency: 1,
        }
    }
}

// ── Coverage ledger ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub coverage_path: PathBuf,
}

impl LedgerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            coverage_path: PathBuf::from(profiled_env_or(
                p,
                "TLC_COVERAGE_PATH",
                "docs/coverage_matrix.csv",
            )),
        }
    }
}

// ── Audit ─────────────────────────────────────────────────────

/// How the audit table is replaced on publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditPublishMode {
    /// Truncate the whole table, then insert.
    #[default]
    Truncate,
    /// Delete only the rows covered by the current grid, then insert.
    Selective,
}

impl fmt::Display for AuditPublishMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditPublishMode::Truncate => f.write_str("truncate"),
            AuditPublishMode::Selective => f.write_str("selective"),
        }
    }
}

impl FromStr for AuditPublishMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "truncate" => Ok(AuditPublishMode::Truncate),
            "selective" | "selective-delete" | "selective_delete" => Ok(AuditPublishMode::Selective),
            other => Err(format!("unknown audit publish mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub publish_mode: AuditPublishMode,
}

impl AuditConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            publish_mode: profiled_env_parse(p, "TLC_AUDIT_PUBLISH_MODE", AuditPublishMode::Truncate),
        }
    }
}

// ── Warehouse (PostgreSQL) ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Schema holding the raw fact tables and the audit table.
    pub schema: String,
}

impl WarehouseConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_parse(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "tlc"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_parse(p, "PG_MAX_CONNECTIONS", 4),
            acquire_timeout_secs: profiled_env_parse(p, "PG_ACQUIRE_TIMEOUT_SECS", 30),
            schema: profiled_env_or(p, "TLC_WAREHOUSE_SCHEMA", "bronze"),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── Tests ────────────────────────────────────────────────────────
