use std::{
    env,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use config as cfg;
use schemars::JsonSchema;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DatabaseConfig {
    /// SQLite connection URL, e.g. `sqlite://data/propdesk.db`.
    pub url: String,
    #[serde(default = "DatabaseConfig::default_max_connections")]
    pub max_connections: u32,
    /// Apply pending migrations on startup
    #[serde(default = "DatabaseConfig::default_auto_migrate")]
    pub auto_migrate: bool,
}

impl DatabaseConfig {
    fn default_max_connections() -> u32 {
        5
    }

    fn default_auto_migrate() -> bool {
        true
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/propdesk.db".into(),
            max_connections: Self::default_max_connections(),
            auto_migrate: Self::default_auto_migrate(),
        }
    }
}

/// Upper bound for hour-based lifetimes and intervals (one year).
pub const MAX_TTL_HOURS: i64 = 24 * 365;
pub const MAX_RESET_TTL_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AuthConfig {
    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    pub jwt_secret: Option<SecretString>,
    #[serde(default = "AuthConfig::default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    #[serde(default = "AuthConfig::default_invitation_ttl_hours")]
    pub invitation_ttl_hours: i64,
    #[serde(default = "AuthConfig::default_password_reset_ttl_minutes")]
    pub password_reset_ttl_minutes: i64,
    /// Issuer label shown by authenticator apps
    #[serde(default = "AuthConfig::default_totp_issuer")]
    pub totp_issuer: String,
}

impl AuthConfig {
    fn default_token_ttl_hours() -> i64 {
        12
    }

    fn default_invitation_ttl_hours() -> i64 {
        24 * 7
    }

    fn default_password_reset_ttl_minutes() -> i64 {
        60
    }

    fn default_totp_issuer() -> String {
        "Propdesk".to_string()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_hours: Self::default_token_ttl_hours(),
            invitation_ttl_hours: Self::default_invitation_ttl_hours(),
            password_reset_ttl_minutes: Self::default_password_reset_ttl_minutes(),
            totp_issuer: Self::default_totp_issuer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EmailConfig {
    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    pub resend_api_key: Option<SecretString>,
    #[serde(default = "EmailConfig::default_api_base")]
    pub api_base: String,
    #[serde(default = "EmailConfig::default_from")]
    pub from: String,
    /// Public URL of the back-office, used to build links in emails
    #[serde(default = "EmailConfig::default_app_url")]
    pub app_url: String,
}

impl EmailConfig {
    fn default_api_base() -> String {
        "https://api.resend.com".to_string()
    }

    fn default_from() -> String {
        "Propdesk <no-reply@propdesk.app>".to_string()
    }

    fn default_app_url() -> String {
        "http://localhost:3000".to_string()
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            resend_api_key: None,
            api_base: Self::default_api_base(),
            from: Self::default_from(),
            app_url: Self::default_app_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StripeConfig {
    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    pub secret_key: Option<SecretString>,
    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    pub webhook_secret: Option<SecretString>,
    #[serde(default = "StripeConfig::default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub pro_price_id: Option<String>,
    #[serde(default)]
    pub enterprise_price_id: Option<String>,
    /// Maximum age of a webhook signature timestamp
    #[serde(default = "StripeConfig::default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: i64,
}

impl StripeConfig {
    fn default_api_base() -> String {
        "https://api.stripe.com".to_string()
    }

    fn default_webhook_tolerance_secs() -> i64 {
        300
    }
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            webhook_secret: None,
            api_base: Self::default_api_base(),
            pro_price_id: None,
            enterprise_price_id: None,
            webhook_tolerance_secs: Self::default_webhook_tolerance_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RailwayConfig {
    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    pub api_token: Option<SecretString>,
    #[serde(default = "RailwayConfig::default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub environment_id: Option<String>,
    #[serde(default)]
    pub service_id: Option<String>,
}

impl RailwayConfig {
    fn default_endpoint() -> String {
        "https://backboard.railway.app/graphql/v2".to_string()
    }
}

impl Default for RailwayConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            endpoint: Self::default_endpoint(),
            project_id: None,
            environment_id: None,
            service_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PushConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    pub access_token: Option<SecretString>,
    #[serde(default = "PushConfig::default_api_base")]
    pub api_base: String,
}

impl PushConfig {
    fn default_api_base() -> String {
        "https://exp.host".to_string()
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            access_token: None,
            api_base: Self::default_api_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchConfig {
    /// MeiliSearch base URL; indexing is disabled when unset
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    pub api_key: Option<SecretString>,
    #[serde(default = "SearchConfig::default_index_prefix")]
    pub index_prefix: String,
}

impl SearchConfig {
    fn default_index_prefix() -> String {
        "propdesk".to_string()
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            index_prefix: Self::default_index_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BackupConfig {
    #[serde(default = "BackupConfig::default_dir")]
    pub dir: String,
    /// Number of completed backups to keep after pruning
    #[serde(default = "BackupConfig::default_retention")]
    pub retention: usize,
    /// Hours between scheduled backups; 0 disables the schedule
    #[serde(default)]
    pub interval_hours: u64,
}

impl BackupConfig {
    fn default_dir() -> String {
        "data/backups".to_string()
    }

    fn default_retention() -> usize {
        14
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: Self::default_dir(),
            retention: Self::default_retention(),
            interval_hours: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SecurityConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "SecurityConfig::default_login_attempts")]
    pub login_attempts_per_minute: u32,
}

impl SecurityConfig {
    fn default_login_attempts() -> u32 {
        10
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            login_attempts_per_minute: Self::default_login_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Settings {
    #[serde(default = "Settings::default_env")]
    pub env: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub stripe: StripeConfig,
    #[serde(default)]
    pub railway: RailwayConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub backups: BackupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: Self::default_env(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            email: EmailConfig::default(),
            stripe: StripeConfig::default(),
            railway: RailwayConfig::default(),
            push: PushConfig::default(),
            search: SearchConfig::default(),
            backups: BackupConfig::default(),
            logging: LoggingConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl Settings {
    fn default_env() -> String {
        env::var("APP_ENV").unwrap_or_else(|_| "development".to_string())
    }

    pub fn is_development(&self) -> bool {
        self.env == "development" || self.env == "test"
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.server.host.trim().is_empty(),
            "server.host cannot be empty"
        );
        anyhow::ensure!(self.server.port > 0, "server.port must be > 0");
        anyhow::ensure!(
            !self.database.url.trim().is_empty(),
            "database.url cannot be empty"
        );
        anyhow::ensure!(
            self.database.max_connections > 0,
            "database.max_connections must be > 0"
        );
        anyhow::ensure!(
            (1..=MAX_TTL_HOURS).contains(&self.auth.token_ttl_hours),
            "auth.token_ttl_hours must be between 1 and {}",
            MAX_TTL_HOURS
        );
        anyhow::ensure!(
            (1..=MAX_TTL_HOURS).contains(&self.auth.invitation_ttl_hours),
            "auth.invitation_ttl_hours must be between 1 and {}",
            MAX_TTL_HOURS
        );
        anyhow::ensure!(
            (1..=MAX_RESET_TTL_MINUTES).contains(&self.auth.password_reset_ttl_minutes),
            "auth.password_reset_ttl_minutes must be between 1 and {}",
            MAX_RESET_TTL_MINUTES
        );
        anyhow::ensure!(
            self.backups.interval_hours <= MAX_TTL_HOURS as u64,
            "backups.interval_hours must be at most {}",
            MAX_TTL_HOURS
        );
        anyhow::ensure!(
            self.backups.interval_hours == 0 || self.backups.retention > 0,
            "backups.retention must be > 0 when scheduled backups are enabled"
        );
        anyhow::ensure!(
            self.security.login_attempts_per_minute > 0,
            "security.login_attempts_per_minute must be > 0"
        );

        if !self.is_development() {
            let secret_len = self
                .auth
                .jwt_secret
                .as_ref()
                .map(|s| s.expose_secret().len())
                .unwrap_or(0);
            anyhow::ensure!(
                secret_len >= 32,
                "auth.jwt_secret must be at least 32 bytes outside development"
            );
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigManager {
    settings: Arc<Settings>,
    config_dir: PathBuf,
    env: String,
}

impl ConfigManager {
    /// Loads and validates settings for `env_override` (or `APP_ENV`).
    pub fn load(env_override: Option<String>) -> Result<Self> {
        let config_dir = Self::default_config_dir();
        Self::from_dir(&config_dir, env_override)
    }

    pub fn from_dir(config_dir: &Path, env_override: Option<String>) -> Result<Self> {
        let env_name = env_override.unwrap_or_else(Settings::default_env);
        let mut settings = Self::load_from_sources(config_dir, &env_name)?;
        settings.env = env_name.clone();
        settings.validate()?;

        Ok(Self {
            settings: Arc::new(settings),
            config_dir: config_dir.to_path_buf(),
            env: env_name,
        })
    }

    pub fn from_settings(settings: Settings) -> Self {
        Self {
            env: settings.env.clone(),
            settings: Arc::new(settings),
            config_dir: PathBuf::from("."),
        }
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.clone()
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    /// Resolves the configuration directory.
    ///
    /// Priority order:
    /// 1. `PROPDESK_CONFIG_DIR`
    /// 2. ./config/
    /// 3. Current directory
    pub fn default_config_dir() -> PathBuf {
        if let Ok(dir) = env::var("PROPDESK_CONFIG_DIR") {
            let dir = PathBuf::from(dir);
            info!("Using config directory: {:?}", dir);
            return dir;
        }

        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let project_config = cwd.join("config");
        if project_config.exists() {
            info!("Using config directory: {:?}", project_config);
            return project_config;
        }

        info!("Using config directory: {:?}", cwd);
        cwd
    }

    pub fn load_from_sources(config_dir: &Path, env_name: &str) -> Result<Settings> {
        let settings: Settings = cfg::Config::builder()
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.toml", env_name))).required(false),
            )
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(cfg::Environment::with_prefix("PROPDESK").separator("__"))
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        Ok(settings)
    }

    /// JSON schema of [`Settings`], printed by `propdesk print-config`.
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(Settings)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_validate_in_development() {
        let settings = Settings {
            env: "development".into(),
            ..Settings::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn production_requires_long_jwt_secret() {
        let mut settings = Settings {
            env: "production".into(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        settings.auth.jwt_secret = Some(SecretString::from("short".to_string()));
        assert!(settings.validate().is_err());

        settings.auth.jwt_secret = Some(SecretString::from("x".repeat(48)));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn lifetimes_and_backup_schedule_are_bounded() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());

        settings.auth.token_ttl_hours = i64::MAX;
        assert!(settings.validate().is_err());
        settings.auth.token_ttl_hours = 12;

        settings.auth.invitation_ttl_hours = MAX_TTL_HOURS + 1;
        assert!(settings.validate().is_err());
        settings.auth.invitation_ttl_hours = MAX_TTL_HOURS;
        assert!(settings.validate().is_ok());

        settings.auth.password_reset_ttl_minutes = 0;
        assert!(settings.validate().is_err());
        settings.auth.password_reset_ttl_minutes = 60;

        settings.backups.retention = 0;
        assert!(settings.validate().is_ok());
        settings.backups.interval_hours = 24;
        assert!(settings.validate().is_err());
        settings.backups.retention = 1;
        assert!(settings.validate().is_ok());

        settings.backups.interval_hours = u64::MAX;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn layered_files_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[server]\nhost = \"127.0.0.1\"\nport = 4000\n\n[backups]\nretention = 3\n",
        )
        .unwrap();
        fs::write(dir.path().join("staging.toml"), "[server]\nport = 4100\n").unwrap();
        fs::write(
            dir.path().join("local.toml"),
            format!("[auth]\njwt_secret = \"{}\"\n", "s".repeat(40)),
        )
        .unwrap();

        let manager = ConfigManager::from_dir(dir.path(), Some("staging".into())).unwrap();
        let settings = manager.settings();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 4100);
        assert_eq!(settings.backups.retention, 3);
        assert_eq!(settings.env, "staging");
        assert_eq!(manager.env(), "staging");
    }

    #[test]
    fn secrets_are_not_serialized() {
        let mut settings = Settings::default();
        settings.stripe.secret_key = Some(SecretString::from("sk_live_123".to_string()));
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("sk_live_123"));
    }

    #[test]
    fn schema_is_an_object() {
        let schema = ConfigManager::json_schema();
        assert!(schema.is_object());
    }
}
