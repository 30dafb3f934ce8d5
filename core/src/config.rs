// Runner configuration
//
// Values come from environment variables (optionally seeded from a `.env`
// file), then a TOML file is overlaid when one is present. The manager reads
// the live values through `SharedConfig` on every call, so toggles such as
// caching take effect without a restart.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};

use crate::{Result, RunnerError};

/// Upper bound for any configured duration (one year).
const MAX_DURATION_SECS: u64 = 31_536_000;

/// Log output format for the fmt layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" | "text" | "pretty" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(RunnerError::Config(format!("unknown log format: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub app_name: String,
    pub version: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Deployment environment name (`production`, `development`, ...)
    pub environment: String,
    pub debug: bool,
    /// Comma separated list of allowed origins, or `*`
    pub cors_origins: String,
    pub api_key: Option<String>,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_minute: u32,
    /// Idle time after which a live session is reclaimed
    pub session_timeout_secs: u64,
    pub auto_cleanup: bool,
    pub cleanup_interval_secs: u64,
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
    /// Bound on process launch plus initialize handshake
    pub handshake_timeout_ms: u64,
    /// Bound on a single tools/list or tools/call round-trip
    pub call_timeout_ms: u64,
    pub protocol_version: String,
    pub platform: String,
    pub is_windows: bool,
    /// Executable renames applied before spawning (e.g. `npx` -> `npx.cmd`)
    pub platform_commands: HashMap<String, String>,
    pub npm_config_cache: Option<String>,
    pub node_path: Option<String>,
    /// `KEY=value` pairs from the environment that could not be parsed
    pub env_errors: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        let is_windows = cfg!(windows);
        Self {
            app_name: "Toolhost Runner".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: "0.0.0.0".to_string(),
            port: 10000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            environment: "production".to_string(),
            debug: false,
            cors_origins: "*".to_string(),
            api_key: None,
            rate_limit_enabled: true,
            rate_limit_per_minute: 60,
            session_timeout_secs: 300,
            auto_cleanup: true,
            cleanup_interval_secs: 60,
            cache_enabled: true,
            cache_ttl_secs: 3600,
            handshake_timeout_ms: 30_000,
            call_timeout_ms: 30_000,
            protocol_version: crate::protocol::DEFAULT_PROTOCOL_VERSION.to_string(),
            platform: std::env::consts::OS.to_string(),
            is_windows,
            platform_commands: default_platform_commands(is_windows),
            npm_config_cache: Some(default_npm_cache(is_windows)),
            node_path: None,
            env_errors: Vec::new(),
        }
    }
}

fn default_platform_commands(is_windows: bool) -> HashMap<String, String> {
    let mut commands = HashMap::new();
    if is_windows {
        commands.insert("npx".to_string(), "npx.cmd".to_string());
        commands.insert("npm".to_string(), "npm.cmd".to_string());
    }
    commands
}

fn default_npm_cache(is_windows: bool) -> String {
    if is_windows {
        let temp = std::env::var("TEMP").unwrap_or_else(|_| "/tmp".to_string());
        Path::new(&temp).join(".npm").to_string_lossy().into_owned()
    } else {
        "/tmp/.npm".to_string()
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

/// Reads typed values, remembering keys that were set but failed to parse.
#[derive(Default)]
struct EnvReader {
    rejected: Vec<String>,
}

impl EnvReader {
    fn parse<T: FromStr>(&mut self, key: &str) -> Option<T> {
        let raw = env_string(key)?;
        let parsed = raw.trim().parse().ok();
        if parsed.is_none() {
            self.rejected.push(format!("{}={}", key, raw));
        }
        parsed
    }

    fn bool(&mut self, key: &str) -> Option<bool> {
        let raw = env_string(key)?;
        let parsed = parse_bool(&raw);
        if parsed.is_none() {
            self.rejected.push(format!("{}={}", key, raw));
        }
        parsed
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl RunnerConfig {
    /// Build configuration from process environment variables on top of defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        let mut env = EnvReader::default();

        if let Some(v) = env_string("HOST") {
            config.host = v;
        }
        if let Some(v) = env.parse("PORT") {
            config.port = v;
        }
        if let Some(v) = env_string("LOG_LEVEL") {
            config.log_level = v.to_ascii_lowercase();
        }
        if let Some(v) = env.parse("LOG_FORMAT") {
            config.log_format = v;
        }
        if let Some(v) = env_string("ENVIRONMENT") {
            config.environment = v;
        }
        if let Some(v) = env.bool("DEBUG") {
            config.debug = v;
        }
        if let Some(v) = env_string("CORS_ORIGINS") {
            config.cors_origins = v;
        }
        if let Some(v) = env_string("API_KEY") {
            config.api_key = Some(v);
        }
        if let Some(v) = env.bool("RATE_LIMIT_ENABLED") {
            config.rate_limit_enabled = v;
        }
        if let Some(v) = env.parse("RATE_LIMIT_PER_MINUTE") {
            config.rate_limit_per_minute = v;
        }
        if let Some(v) = env.parse("MCP_SESSION_TIMEOUT") {
            config.session_timeout_secs = v;
        }
        if let Some(v) = env.bool("MCP_AUTO_CLEANUP") {
            config.auto_cleanup = v;
        }
        if let Some(v) = env.parse("MCP_CLEANUP_INTERVAL") {
            config.cleanup_interval_secs = v;
        }
        if let Some(v) = env.bool("MCP_CACHE_ENABLED") {
            config.cache_enabled = v;
        }
        if let Some(v) = env.parse("MCP_CACHE_TTL") {
            config.cache_ttl_secs = v;
        }
        if let Some(v) = env.parse("MCP_HANDSHAKE_TIMEOUT_MS") {
            config.handshake_timeout_ms = v;
        }
        if let Some(v) = env.parse("MCP_CALL_TIMEOUT_MS") {
            config.call_timeout_ms = v;
        }
        if let Some(v) = env_string("MCP_PROTOCOL_VERSION") {
            config.protocol_version = v;
        }
        if let Some(v) = env_string("NPM_CONFIG_CACHE") {
            config.npm_config_cache = Some(v);
        }
        if let Some(v) = env_string("NODE_PATH") {
            config.node_path = Some(v);
        }

        config.env_errors = env.rejected;
        config
    }

    /// Load configuration the way the server binary does: `.env`, environment
    /// variables, then the TOML file named by `TOOLHOST_CONFIG` (or
    /// `./toolhost.toml`) when it exists.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        let base = Self::from_env();
        let path = std::env::var("TOOLHOST_CONFIG").unwrap_or_else(|_| "toolhost.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target: "config", path = %path, "No TOML config found; using defaults/env");
            return base;
        }
        match base.clone().overlay_file(p) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(target: "config", path = %path, error = %e, "Failed to apply TOML config; using defaults/env");
                base
            }
        }
    }

    /// Overlay the values present in a TOML file onto this configuration.
    pub fn overlay_file(self, path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let parsed: RunnerToml = toml::from_str(&raw)
            .map_err(|e| RunnerError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(parsed.overlay(self))
    }

    pub fn validate(&self) -> Result<()> {
        if !self.env_errors.is_empty() {
            return Err(RunnerError::Config(format!(
                "unparsable environment values: {}",
                self.env_errors.join(", ")
            )));
        }
        if self.rate_limit_enabled && self.rate_limit_per_minute == 0 {
            return Err(RunnerError::Config(
                "rate_limit_per_minute must be greater than zero".into(),
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(RunnerError::Config(
                "cleanup_interval_secs must be greater than zero".into(),
            ));
        }
        if self.handshake_timeout_ms == 0 || self.call_timeout_ms == 0 {
            return Err(RunnerError::Config("timeouts must be greater than zero".into()));
        }
        for (name, secs) in [
            ("cache_ttl_secs", self.cache_ttl_secs),
            ("session_timeout_secs", self.session_timeout_secs),
            ("cleanup_interval_secs", self.cleanup_interval_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(RunnerError::Config(format!(
                    "{} must not exceed {} seconds",
                    name, MAX_DURATION_SECS
                )));
            }
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        seconds(self.cache_ttl_secs)
    }

    pub fn session_timeout(&self) -> chrono::Duration {
        seconds(self.session_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cleanup_interval_secs.clamp(1, MAX_DURATION_SECS))
    }

    /// Map a command to its platform-specific executable name.
    pub fn platform_command(&self, command: &str) -> String {
        self.platform_commands
            .get(command)
            .cloned()
            .unwrap_or_else(|| command.to_string())
    }

    /// Variables injected into every provider process on top of the
    /// inherited environment, before per-spec overrides.
    pub fn env_defaults(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        if let Some(ref cache) = self.npm_config_cache {
            env.insert("NPM_CONFIG_CACHE".to_string(), cache.clone());
        }
        if let Some(ref node_path) = self.node_path {
            env.insert("NODE_PATH".to_string(), node_path.clone());
        }
        env
    }

    pub fn is_development(&self) -> bool {
        matches!(
            self.environment.to_ascii_lowercase().as_str(),
            "development" | "dev" | "local"
        )
    }

    pub fn is_production(&self) -> bool {
        matches!(
            self.environment.to_ascii_lowercase().as_str(),
            "production" | "prod"
        )
    }

    pub fn cors_origins_list(&self) -> Vec<String> {
        if self.cors_origins.trim() == "*" {
            return vec!["*".to_string()];
        }
        self.cors_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect()
    }

    /// Configuration view that is safe to log or return over HTTP.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "app_name": self.app_name,
            "version": self.version,
            "environment": self.environment,
            "host": self.host,
            "port": self.port,
            "log_level": self.log_level,
            "platform": self.platform,
            "is_windows": self.is_windows,
            "debug": self.debug,
            "mcp_cache_enabled": self.cache_enabled,
            "mcp_cache_ttl": self.cache_ttl_secs,
            "mcp_session_timeout": self.session_timeout_secs,
            "mcp_auto_cleanup": self.auto_cleanup,
            "cors_origins": self.cors_origins_list(),
            "rate_limit_enabled": self.rate_limit_enabled,
            "rate_limit_per_minute": self.rate_limit_per_minute,
            "api_key_configured": self.api_key.is_some(),
        })
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    // clamped so the conversion can never overflow
    chrono::Duration::seconds(secs.min(MAX_DURATION_SECS) as i64)
}

/// Process-wide configuration handle read at call time.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<RunnerConfig>>,
}

impl SharedConfig {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, RunnerConfig> {
        self.inner.read().await
    }

    pub async fn snapshot(&self) -> RunnerConfig {
        self.inner.read().await.clone()
    }

    pub async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut RunnerConfig),
    {
        let mut guard = self.inner.write().await;
        f(&mut guard);
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

impl From<RunnerConfig> for SharedConfig {
    fn from(config: RunnerConfig) -> Self {
        Self::new(config)
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, Deserialize)]
struct RunnerToml {
    host: Option<String>,
    port: Option<u16>,
    log_level: Option<String>,
    log_format: Option<LogFormat>,
    environment: Option<String>,
    debug: Option<bool>,
    cors_origins: Option<String>,
    api_key: Option<String>,
    protocol_version: Option<String>,
    npm_config_cache: Option<String>,
    node_path: Option<String>,
    cache: Option<CacheToml>,
    sessions: Option<SessionsToml>,
    rate_limit: Option<RateLimitToml>,
    platform_commands: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CacheToml {
    enabled: Option<bool>,
    ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SessionsToml {
    timeout_secs: Option<u64>,
    auto_cleanup: Option<bool>,
    cleanup_interval_secs: Option<u64>,
    handshake_timeout_ms: Option<u64>,
    call_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RateLimitToml {
    enabled: Option<bool>,
    per_minute: Option<u32>,
}

impl RunnerToml {
    fn overlay(self, mut base: RunnerConfig) -> RunnerConfig {
        if let Some(v) = self.host {
            base.host = v;
        }
        if let Some(v) = self.port {
            base.port = v;
        }
        if let Some(v) = self.log_level {
            base.log_level = v.to_ascii_lowercase();
        }
        if let Some(v) = self.log_format {
            base.log_format = v;
        }
        if let Some(v) = self.environment {
            base.environment = v;
        }
        if let Some(v) = self.debug {
            base.debug = v;
        }
        if let Some(v) = self.cors_origins {
            base.cors_origins = v;
        }
        if let Some(v) = self.api_key {
            base.api_key = Some(v).filter(|k| !k.is_empty());
        }
        if let Some(v) = self.protocol_version {
            base.protocol_version = v;
        }
        if let Some(v) = self.npm_config_cache {
            base.npm_config_cache = Some(v);
        }
        if let Some(v) = self.node_path {
            base.node_path = Some(v);
        }
        if let Some(c) = self.cache {
            c.apply(&mut base);
        }
        if let Some(s) = self.sessions {
            s.apply(&mut base);
        }
        if let Some(r) = self.rate_limit {
            r.apply(&mut base);
        }
        if let Some(commands) = self.platform_commands {
            base.platform_commands.extend(commands);
        }
        base
    }
}

impl CacheToml {
    fn apply(self, c: &mut RunnerConfig) {
        if let Some(v) = self.enabled {
            c.cache_enabled = v;
        }
        if let Some(v) = self.ttl_secs {
            c.cache_ttl_secs = v;
        }
    }
}

impl SessionsToml {
    fn apply(self, c: &mut RunnerConfig) {
        if let Some(v) = self.timeout_secs {
            c.session_timeout_secs = v;
        }
        if let Some(v) = self.auto_cleanup {
            c.auto_cleanup = v;
        }
        if let Some(v) = self.cleanup_interval_secs {
            c.cleanup_interval_secs = v;
        }
        if let Some(v) = self.handshake_timeout_ms {
            c.handshake_timeout_ms = v;
        }
        if let Some(v) = self.call_timeout_ms {
            c.call_timeout_ms = v;
        }
    }
}

impl RateLimitToml {
    fn apply(self, c: &mut RunnerConfig) {
        if let Some(v) = self.enabled {
            c.rate_limit_enabled = v;
        }
        if let Some(v) = self.per_minute {
            c.rate_limit_per_minute = v;
        }
    }
}
