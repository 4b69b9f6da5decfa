//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// AI peer settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub crm: CrmConfig,

    #[serde(default)]
    pub calendar: CalendarConfig,

    #[serde(default)]
    pub sms: SmsConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub idempotency: IdempotencyConfig,

    /// Deployment environment name; `"production"` refuses the idempotency
    /// bypass at startup.
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL, used to build the media-stream URL
    /// handed to the telephony provider in TwiML.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "frontdesk_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// AI peer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiConfig {
    /// API key; without it the relay fails caller connections immediately.
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_openai_model")]
    pub model: String,

    #[serde(default = "default_openai_voice")]
    pub voice: String,

    /// System instructions for the receptionist persona.
    #[serde(default = "default_instructions")]
    pub instructions: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrmConfig {
    #[serde(default = "default_crm_url")]
    pub base_url: String,

    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarConfig {
    #[serde(default = "default_calendar_url")]
    pub base_url: String,

    #[serde(default)]
    pub token: String,

    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmsConfig {
    #[serde(default)]
    pub account_sid: String,

    #[serde(default)]
    pub auth_token: String,

    /// Sending number in E.164.
    #[serde(default)]
    pub from: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertsConfig {
    /// Incoming-webhook URL for operator alerts; empty disables delivery.
    #[serde(default)]
    pub webhook_url: String,
}

/// Call session lifecycle settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Sessions idle longer than this are evicted; 0 disables the sweep.
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdempotencyConfig {
    /// Skips the durable dedup layer. Refused when `environment` is
    /// `"production"`.
    #[serde(default)]
    pub bypass: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_db_path() -> String {
    "frontdesk.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_pool_max_size() -> u32 {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-realtime-preview".to_string()
}

fn default_openai_voice() -> String {
    "alloy".to_string()
}

fn default_instructions() -> String {
    "You are the phone receptionist for a home services company. Greet the \
     caller, collect their name, confirm the service address, capture the \
     problem, offer appointment windows, and book an estimate visit. Use the \
     provided tools for every workflow step; never invent availability."
        .to_string()
}

fn default_crm_url() -> String {
    "https://api.hubapi.com/crm/v3".to_string()
}

fn default_calendar_url() -> String {
    "https://www.googleapis.com/calendar/v3".to_string()
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

fn default_session_ttl_secs() -> u64 {
    900
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            openai: OpenAiConfig::default(),
            crm: CrmConfig::default(),
            calendar: CalendarConfig::default(),
            sms: SmsConfig::default(),
            alerts: AlertsConfig::default(),
            session: SessionConfig::default(),
            idempotency: IdempotencyConfig::default(),
            environment: default_environment(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_openai_model(),
            voice: default_openai_voice(),
            instructions: default_instructions(),
        }
    }
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            base_url: default_crm_url(),
            token: String::new(),
        }
    }
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            base_url: default_calendar_url(),
            token: String::new(),
            calendar_id: default_calendar_id(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `FRONTDESK_HOST` overrides `server.host`
/// - `FRONTDESK_PORT` overrides `server.port`
/// - `FRONTDESK_PUBLIC_URL` overrides `server.public_url`
/// - `FRONTDESK_DB_PATH` overrides `database.path`
/// - `FRONTDESK_LOG_LEVEL` overrides `logging.level`
/// - `FRONTDESK_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `FRONTDESK_OPENAI_API_KEY` overrides `openai.api_key`
/// - `FRONTDESK_CRM_TOKEN` overrides `crm.token`
/// - `FRONTDESK_CALENDAR_TOKEN` overrides `calendar.token`
/// - `FRONTDESK_SMS_AUTH_TOKEN` overrides `sms.auth_token`
/// - `FRONTDESK_ALERT_WEBHOOK_URL` overrides `alerts.webhook_url`
/// - `FRONTDESK_SESSION_TTL_SECS` overrides `session.ttl_secs`
/// - `FRONTDESK_IDEMPOTENCY_BYPASS` overrides `idempotency.bypass`
/// - `FRONTDESK_ENVIRONMENT` overrides `environment`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("FRONTDESK_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("FRONTDESK_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(url) = std::env::var("FRONTDESK_PUBLIC_URL") {
        config.server.public_url = url;
    }
    if let Ok(db_path) = std::env::var("FRONTDESK_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("FRONTDESK_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("FRONTDESK_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(key) = std::env::var("FRONTDESK_OPENAI_API_KEY") {
        config.openai.api_key = key;
    }
    if let Ok(token) = std::env::var("FRONTDESK_CRM_TOKEN") {
        config.crm.token = token;
    }
    if let Ok(token) = std::env::var("FRONTDESK_CALENDAR_TOKEN") {
        config.calendar.token = token;
    }
    if let Ok(token) = std::env::var("FRONTDESK_SMS_AUTH_TOKEN") {
        config.sms.auth_token = token;
    }
    if let Ok(url) = std::env::var("FRONTDESK_ALERT_WEBHOOK_URL") {
        config.alerts.webhook_url = url;
    }
    if let Ok(ttl) = std::env::var("FRONTDESK_SESSION_TTL_SECS") {
        if let Ok(parsed) = ttl.parse() {
            config.session.ttl_secs = parsed;
        }
    }
    if let Ok(bypass) = std::env::var("FRONTDESK_IDEMPOTENCY_BYPASS") {
        config.idempotency.bypass = bypass == "true" || bypass == "1";
    }
    if let Ok(environment) = std::env::var("FRONTDESK_ENVIRONMENT") {
        config.environment = environment;
    }

    Ok(config)
}
