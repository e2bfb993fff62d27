use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub data_dir: String,
    pub wal_flush_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_max_upload_bytes() -> u64 {
    25 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_true")]
    pub enable_hybrid_search: bool,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
    #[serde(default)]
    pub fts_language_allowlist: Vec<String>,
}

fn default_max_context_chars() -> usize {
    12_000
}

fn default_rrf_k() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_s")]
    pub base_delay_s: u64,
    #[serde(default = "default_retry_max_delay_s")]
    pub max_delay_s: u64,
}

fn default_retry_max_attempts() -> u32 {
    4
}

fn default_retry_base_delay_s() -> u64 {
    1
}

fn default_retry_max_delay_s() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingCacheConfig {
    #[serde(default = "default_embedding_cache_ttl_seconds")]
    pub ttl_seconds: u64,
}

fn default_embedding_cache_ttl_seconds() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    #[serde(default = "default_app_env")]
    pub app_env: String,
    pub jwt_secret: Option<String>,
    #[serde(default)]
    pub jwt_cookie_secure: bool,
    #[serde(default)]
    pub metrics_require_auth: bool,
}

fn default_app_env() -> String {
    "development".to_string()
}

impl SecurityConfig {
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default = "default_upload_config")]
    pub upload: UploadConfig,
    #[serde(default = "default_retrieval_config")]
    pub retrieval: RetrievalConfig,
    #[serde(default = "default_retry_config")]
    pub retry: RetryConfig,
    #[serde(default = "default_embedding_cache_config")]
    pub embedding_cache: EmbeddingCacheConfig,
    #[serde(default = "default_security_config")]
    pub security: SecurityConfig,
}

fn default_upload_config() -> UploadConfig {
    UploadConfig {
        max_upload_bytes: default_max_upload_bytes(),
    }
}

fn default_retrieval_config() -> RetrievalConfig {
    RetrievalConfig {
        max_context_chars: default_max_context_chars(),
        enable_hybrid_search: default_true(),
        rrf_k: default_rrf_k(),
        fts_language_allowlist: Vec::new(),
    }
}

fn default_retry_config() -> RetryConfig {
    RetryConfig {
        max_attempts: default_retry_max_attempts(),
        base_delay_s: default_retry_base_delay_s(),
        max_delay_s: default_retry_max_delay_s(),
    }
}

fn default_embedding_cache_config() -> EmbeddingCacheConfig {
    EmbeddingCacheConfig {
        ttl_seconds: default_embedding_cache_ttl_seconds(),
    }
}

fn default_security_config() -> SecurityConfig {
    SecurityConfig {
        app_env: default_app_env(),
        jwt_secret: None,
        jwt_cookie_secure: false,
        metrics_require_auth: false,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("configuration error: {0}")]
    Load(#[from] ConfigError),
    #[error("JWT_SECRET must be at least 32 characters in production")]
    WeakJwtSecret,
    #[error("JWT_COOKIE_SECURE must be true in production")]
    InsecureCookies,
    #[error("METRICS_REQUIRE_AUTH must be true in production")]
    UnauthenticatedMetrics,
}

impl AppConfig {
    /// Layers `config/default.{toml,yaml,...}` under an optional
    /// `config/{RUN_MODE}` file, then `RAGCORE_*` environment variables on
    /// top, matching the teacher's layering order exactly.
    pub fn load() -> Result<Self, ConfigValidationError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("RAGCORE").separator("__"));

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate_production_posture()?;
        Ok(config)
    }

    /// Fail-fast checks for insecure defaults. Identity issuance itself is
    /// out of scope for this core, but validating the posture of the
    /// collaborator's secrets before accepting traffic is an ambient
    /// concern this config layer still owns.
    fn validate_production_posture(&self) -> Result<(), ConfigValidationError> {
        if !self.security.is_production() {
            return Ok(());
        }

        let secret_len = self
            .security
            .jwt_secret
            .as_deref()
            .map(str::len)
            .unwrap_or(0);
        if secret_len < 32 {
            return Err(ConfigValidationError::WeakJwtSecret);
        }
        if !self.security.jwt_cookie_secure {
            return Err(ConfigValidationError::InsecureCookies);
        }
        if !self.security.metrics_require_auth {
            return Err(ConfigValidationError::UnauthenticatedMetrics);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_security(app_env: &str) -> SecurityConfig {
        SecurityConfig {
            app_env: app_env.to_string(),
            jwt_secret: Some("x".repeat(32)),
            jwt_cookie_secure: true,
            metrics_require_auth: true,
        }
    }

    fn base_config(security: SecurityConfig) -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 8080,
            },
            storage: StorageConfig {
                data_dir: "/tmp/data".into(),
                wal_flush_interval_ms: 100,
            },
            upload: default_upload_config(),
            retrieval: default_retrieval_config(),
            retry: default_retry_config(),
            embedding_cache: default_embedding_cache_config(),
            security,
        }
    }

    #[test]
    fn development_posture_allows_weak_secret() {
        let mut security = base_security("development");
        security.jwt_secret = None;
        security.jwt_cookie_secure = false;
        let config = base_config(security);
        assert!(config.validate_production_posture().is_ok());
    }

    #[test]
    fn production_rejects_short_jwt_secret() {
        let mut security = base_security("production");
        security.jwt_secret = Some("short".to_string());
        let config = base_config(security);
        assert!(matches!(
            config.validate_production_posture(),
            Err(ConfigValidationError::WeakJwtSecret)
        ));
    }

    #[test]
    fn production_requires_secure_cookies_and_authenticated_metrics() {
        let mut security = base_security("production");
        security.jwt_cookie_secure = false;
        let config = base_config(security);
        assert!(matches!(
            config.validate_production_posture(),
            Err(ConfigValidationError::InsecureCookies)
        ));

        let mut security = base_security("production");
        security.metrics_require_auth = false;
        let config = base_config(security);
        assert!(matches!(
            config.validate_production_posture(),
            Err(ConfigValidationError::UnauthenticatedMetrics)
        ));
    }

    #[test]
    fn production_accepts_hardened_posture() {
        let config = base_config(base_security("production"));
        assert!(config.validate_production_posture().is_ok());
    }
}
