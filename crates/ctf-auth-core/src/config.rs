use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub flags: FlagsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
    pub redis_url: Option<ConfigValue>,
    /// Namespace prepended to every key written to Redis.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            redis_url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// HS256 secret for access tokens. Supports `env:VAR`.
    pub signing_secret: ConfigValue,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,
    #[serde(default = "default_authz_code_ttl")]
    pub authorization_code_ttl_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressConfig {
    /// When true, later endpoints refuse clients that have not recorded the
    /// preceding stages.
    #[serde(default)]
    pub enforce_stage_order: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlagsConfig {
    #[serde(default = "default_flag_stage1")]
    pub stage1: String,
    #[serde(default = "default_flag_stage2")]
    pub stage2: String,
    #[serde(default = "default_flag_stage3")]
    pub stage3: String,
    #[serde(default = "default_flag_stage4")]
    pub stage4: String,
    #[serde(default = "default_flag_stage5")]
    pub stage5: String,
    #[serde(default = "default_flag_final")]
    pub r#final: String,
}

impl FlagsConfig {
    /// Flag awarded for the given stage number (1..=5).
    pub fn for_stage(&self, stage: u8) -> Option<&str> {
        match stage {
            1 => Some(&self.stage1),
            2 => Some(&self.stage2),
            3 => Some(&self.stage3),
            4 => Some(&self.stage4),
            5 => Some(&self.stage5),
            _ => None,
        }
    }
}

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            stage1: default_flag_stage1(),
            stage2: default_flag_stage2(),
            stage3: default_flag_stage3(),
            stage4: default_flag_stage4(),
            stage5: default_flag_stage5(),
            r#final: default_flag_final(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Optional bearer token required to scrape `/metrics`.
    pub bearer_token: Option<ConfigValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Bearer token the visit actor presents to `GET /admin/visits/next`.
    /// Unset leaves that endpoint open.
    pub visit_token: Option<ConfigValue>,
    /// Pending visits kept; the oldest are dropped past this.
    #[serde(default = "default_max_pending_visits")]
    pub max_pending_visits: usize,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            visit_token: None,
            max_pending_visits: default_max_pending_visits(),
        }
    }
}

// --- ConfigValue: supports "env:VAR_NAME" syntax ---

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Literal(String),
}

impl ConfigValue {
    pub fn resolve(&self) -> Result<String> {
        let ConfigValue::Literal(s) = self;
        if let Some(var_name) = s.strip_prefix("env:") {
            std::env::var(var_name).map_err(|_| {
                Error::Config(format!("environment variable {var_name} not set"))
            })
        } else {
            Ok(s.clone())
        }
    }
}

// --- Config resolution ---

const CONFIG_FILENAME: &str = "ctf_auth.toml";
const CONFIG_ENV_VAR: &str = "CTF_AUTH_CONFIG";
const MIN_SIGNING_SECRET_LEN: usize = 16;

impl Config {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Redis && self.store.redis_url.is_none() {
            return Err(Error::Config(
                "store.redis_url is required when backend is \"redis\"".to_string(),
            ));
        }
        for (name, ttl) in [
            ("access_token_ttl_secs", self.jwt.access_token_ttl_secs),
            ("refresh_token_ttl_secs", self.jwt.refresh_token_ttl_secs),
            ("authorization_code_ttl_secs", self.jwt.authorization_code_ttl_secs),
        ] {
            if ttl == 0 {
                return Err(Error::Config(format!("jwt.{name} must be at least 1")));
            }
        }
        if self.admin.max_pending_visits == 0 {
            return Err(Error::Config("admin.max_pending_visits must be at least 1".to_string()));
        }
        let secret = self.jwt.signing_secret.resolve()?;
        if secret.len() < MIN_SIGNING_SECRET_LEN {
            return Err(Error::Config(format!(
                "jwt.signing_secret must be at least {MIN_SIGNING_SECRET_LEN} bytes"
            )));
        }
        Ok(())
    }
}

/// Resolve config file location using the standard search order:
/// 1. Explicit path (CLI flag)
/// 2. CTF_AUTH_CONFIG env var
/// 3. Current directory
/// 4. Walk up parent directories
/// 5. ~/.config/ctf_auth/config.toml
/// 6. /etc/ctf_auth/config.toml
pub fn resolve_config(explicit_path: Option<&Path>) -> Result<Config> {
    let mut searched = Vec::new();

    if let Some(path) = explicit_path {
        if path.exists() {
            return Config::from_path(path);
        }
        return Err(Error::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Config::from_path(&path);
        }
        searched.push(path);
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = Some(cwd.as_path());
        while let Some(d) = dir {
            let config_path = d.join(CONFIG_FILENAME);
            if config_path.exists() {
                return Config::from_path(&config_path);
            }
            searched.push(config_path);
            dir = d.parent();
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let user_config = config_dir.join("ctf_auth").join("config.toml");
        if user_config.exists() {
            return Config::from_path(&user_config);
        }
        searched.push(user_config);
    }

    let system_config = PathBuf::from("/etc/ctf_auth/config.toml");
    if system_config.exists() {
        return Config::from_path(&system_config);
    }
    searched.push(system_config);

    Err(Error::ConfigNotFound { searched })
}

// --- Defaults ---

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 5000 }
fn default_store_backend() -> StoreBackend { StoreBackend::Memory }
fn default_key_prefix() -> String { "ctf_auth".to_string() }
fn default_issuer() -> String { "oauth-ctf".to_string() }
fn default_audience() -> String { "oauth-ctf-api".to_string() }
fn default_access_ttl() -> u64 { 3600 }       // 1 hour
fn default_refresh_ttl() -> u64 { 86_400 }    // 24 hours
fn default_authz_code_ttl() -> u64 { 600 }    // 10 minutes
fn default_flag_stage1() -> String { "CTF{ssrf_client_registration_exposed}".to_string() }
fn default_flag_stage2() -> String { "CTF{xss_authorization_code_stolen}".to_string() }
fn default_flag_stage3() -> String { "CTF{pkce_downgrade_jwt_confusion}".to_string() }
fn default_flag_stage4() -> String { "CTF{graphql_introspection_admin_scope}".to_string() }
fn default_flag_stage5() -> String { "CTF{refresh_token_scope_escalation}".to_string() }
fn default_flag_final() -> String { "CTF{oauth_chain_master_2025}".to_string() }
fn default_max_pending_visits() -> usize { 1000 }
