use crate::error::{LimiterError, Result};
use crate::rate_limit::types::EngineSettings;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Prefix of nested environment overrides, e.g. `RATELIMITER__LIMITS__LOCK_DURATION_SECONDS`
pub const ENV_PREFIX: &str = "RATELIMITER";

/// Suffix of flat per-token quota variables, e.g. `TOKEN_1_MAX_REQUESTS_PER_SECOND`
const TOKEN_ENV_SUFFIX: &str = "_MAX_REQUESTS_PER_SECOND";

/// Prefix of nested per-token quota variables, e.g. `RATELIMITER__LIMITS__TOKENS__TOKEN_1`
const NESTED_TOKEN_PREFIX: &str = "RATELIMITER__LIMITS__TOKENS__";

/// Main rate limiter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Shared store configuration
    #[serde(default)]
    pub redis: RedisConfig,
    /// Rate limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,
}

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Quota for requests identified by client address
    #[serde(default = "default_ip_max_requests")]
    pub ip_max_requests_per_second: u64,
    /// Seconds an admitted request counts against its key
    #[serde(default = "default_lock_duration")]
    pub lock_duration_seconds: u64,
    /// Seconds a key stays blocked after hitting its quota
    #[serde(default = "default_block_duration")]
    pub block_duration_seconds: u64,
    /// Bound on a single token quota lookup
    #[serde(default = "default_quota_lookup_timeout")]
    pub quota_lookup_timeout_ms: u64,
    /// Token -> quota
    #[serde(default)]
    pub tokens: HashMap<String, u64>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_ip_max_requests() -> u64 {
    10
}

fn default_lock_duration() -> u64 {
    1
}

fn default_block_duration() -> u64 {
    60
}

fn default_quota_lookup_timeout() -> u64 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            ip_max_requests_per_second: default_ip_max_requests(),
            lock_duration_seconds: default_lock_duration(),
            block_duration_seconds: default_block_duration(),
            quota_lookup_timeout_ms: default_quota_lookup_timeout(),
            tokens: HashMap::new(),
        }
    }
}

impl LimiterConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LimiterError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load layered configuration from the process environment.
    ///
    /// See [`LimiterConfig::load_from`] for the layering.
    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::load_from(path, std::env::vars())
    }

    /// Load layered configuration: optional YAML file, then `RATELIMITER__*`
    /// variables, then the flat variables (`IP_MAX_REQUESTS_PER_SECOND`,
    /// `REDIS_URL`, `<TOKEN>_MAX_REQUESTS_PER_SECOND`, ...).
    ///
    /// Token names are case-sensitive, so they never go through the `config`
    /// crate, which lowercases map keys.
    pub fn load_from<I>(path: Option<&str>, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars.into_iter().collect();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_nested_overrides(&vars)?;
        config.apply_env_overrides(vars)?;
        config.validate()?;

        Ok(config)
    }

    /// Apply `RATELIMITER__SECTION__FIELD` variables.
    ///
    /// Scalars are read through the `config` crate. Tokens set as
    /// `RATELIMITER__LIMITS__TOKENS__<TOKEN>` keep the case of `<TOKEN>`.
    pub fn apply_nested_overrides(&mut self, vars: &[(String, String)]) -> Result<()> {
        let mut scalars = config::Map::new();
        for (name, value) in vars {
            if let Some(token) = name.strip_prefix(NESTED_TOKEN_PREFIX) {
                if !token.is_empty() {
                    let limit = parse_env(name, value)?;
                    self.limits.tokens.insert(token.to_string(), limit);
                }
            } else if name.starts_with(ENV_PREFIX) {
                scalars.insert(name.clone(), value.clone());
            }
        }

        let source = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(scalars)),
            )
            .build()
            .map_err(|e| LimiterError::Config(format!("Failed to load config: {}", e)))?;

        override_from(&source, "server.host", &mut self.server.host)?;
        override_from(&source, "server.port", &mut self.server.port)?;
        override_from(&source, "redis.url", &mut self.redis.url)?;
        override_from(
            &source,
            "limits.ip_max_requests_per_second",
            &mut self.limits.ip_max_requests_per_second,
        )?;
        override_from(
            &source,
            "limits.lock_duration_seconds",
            &mut self.limits.lock_duration_seconds,
        )?;
        override_from(
            &source,
            "limits.block_duration_seconds",
            &mut self.limits.block_duration_seconds,
        )?;
        override_from(
            &source,
            "limits.quota_lookup_timeout_ms",
            &mut self.limits.quota_lookup_timeout_ms,
        )?;

        Ok(())
    }

    /// Apply the flat environment variables on top of this configuration.
    ///
    /// `RATELIMITER__*` variables are skipped here; they belong to
    /// [`LimiterConfig::apply_nested_overrides`].
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            if name.starts_with(ENV_PREFIX) {
                continue;
            }

            match name.as_str() {
                "IP_MAX_REQUESTS_PER_SECOND" => {
                    self.limits.ip_max_requests_per_second = parse_env(&name, &value)?
                }
                "LOCK_DURATION_SECONDS" => {
                    self.limits.lock_duration_seconds = parse_env(&name, &value)?
                }
                "BLOCK_DURATION_SECONDS" => {
                    self.limits.block_duration_seconds = parse_env(&name, &value)?
                }
                "APP_WEB_PORT" => self.server.port = parse_env(&name, &value)?,
                "REDIS_URL" => self.redis.url = normalize_redis_url(&value),
                _ => {
                    if let Some(token) = name.strip_suffix(TOKEN_ENV_SUFFIX) {
                        if !token.is_empty() {
                            let limit = parse_env(&name, &value)?;
                            self.limits.tokens.insert(token.to_string(), limit);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.redis.url.is_empty() {
            return Err(LimiterError::Config("Redis URL cannot be empty".to_string()));
        }

        if self.limits.ip_max_requests_per_second == 0 {
            return Err(LimiterError::Config(
                "IP max requests per second must be > 0".to_string(),
            ));
        }
        if self.limits.lock_duration_seconds == 0 {
            return Err(LimiterError::Config(
                "Lock duration must be > 0".to_string(),
            ));
        }
        if self.limits.block_duration_seconds == 0 {
            return Err(LimiterError::Config(
                "Block duration must be > 0".to_string(),
            ));
        }
        if self.limits.quota_lookup_timeout_ms == 0 {
            return Err(LimiterError::Config(
                "Quota lookup timeout must be > 0".to_string(),
            ));
        }

        for (token, limit) in &self.limits.tokens {
            if token.is_empty() {
                return Err(LimiterError::Config("Token cannot be empty".to_string()));
            }
            if *limit == 0 {
                return Err(LimiterError::Config(format!(
                    "Quota must be > 0 for token: {}",
                    token
                )));
            }
        }

        Ok(())
    }

    /// Settings handed to the rate limiter engine
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings::new(
            self.limits.tokens.clone(),
            Duration::from_secs(self.limits.lock_duration_seconds),
            Duration::from_secs(self.limits.block_duration_seconds),
            self.limits.ip_max_requests_per_second,
        )
        .with_quota_lookup_timeout(Duration::from_millis(self.limits.quota_lookup_timeout_ms))
    }
}

/// Replace `target` with `key` from `source` when it is set
fn override_from<T: DeserializeOwned>(
    source: &config::Config,
    key: &str,
    target: &mut T,
) -> Result<()> {
    match source.get::<T>(key) {
        Ok(value) => {
            *target = value;
            Ok(())
        }
        Err(config::ConfigError::NotFound(_)) => Ok(()),
        Err(e) => Err(LimiterError::Config(format!("Invalid value for {}: {}", key, e))),
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| LimiterError::Config(format!("Error converting {} to int: {}", name, e)))
}

/// Accept bare `host:port` addresses as well as full Redis URLs
fn normalize_redis_url(value: &str) -> String {
    if value.contains("://") {
        value.to_string()
    } else {
        format!("redis://{}", value)
    }
}
