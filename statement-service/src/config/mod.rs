use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone, Deserialize)]
pub struct StatementConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub ocr: OcrConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expiry_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub upload_folder: PathBuf,
    pub retention_seconds: u64,
    pub max_upload_bytes: usize,
}

impl StorageConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    pub tesseract_cmd: String,
    pub pdftoppm_cmd: String,
    pub dpi: u32,
    pub timeout_seconds: u64,
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub register_attempts: u32,
    pub register_window_seconds: u64,
}

impl StatementConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = StatementConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("statement-service"))?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")))?,
            log_level: get_env("LOG_LEVEL", Some("info"))?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.trim().is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2)?,
                run_migrations: parse_env("RUN_MIGRATIONS", true)?,
            },
            jwt: JwtConfig {
                // The development fallback is never accepted in production.
                secret: get_env("JWT_SECRET_KEY", (!is_prod).then_some(DEV_JWT_SECRET))?,
                access_token_expiry_minutes: parse_env("JWT_ACCESS_TOKEN_EXPIRES_MINUTES", 60)?,
            },
            storage: StorageConfig {
                upload_folder: PathBuf::from(get_env("UPLOAD_FOLDER", Some("uploads"))?),
                retention_seconds: parse_env("UPLOAD_RETENTION_SECONDS", 3600)?,
                max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", 16 * 1024 * 1024)?,
            },
            ocr: OcrConfig {
                tesseract_cmd: get_env("TESSERACT_CMD", Some("tesseract"))?,
                pdftoppm_cmd: get_env("PDFTOPPM_CMD", Some("pdftoppm"))?,
                dpi: parse_env("OCR_DPI", 300)?,
                timeout_seconds: parse_env("OCR_TIMEOUT_SECONDS", 120)?,
                max_concurrent: parse_env("OCR_MAX_CONCURRENT", 2)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"))?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("LOGIN_RATE_LIMIT", 10)?,
                login_window_seconds: 60,
                register_attempts: parse_env("REGISTER_RATE_LIMIT", 5)?,
                register_window_seconds: 60,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRES_MINUTES must be positive"
            )));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS cannot exceed DATABASE_MAX_CONNECTIONS"
            )));
        }

        if self.ocr.max_concurrent == 0 || self.ocr.dpi == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OCR_MAX_CONCURRENT and OCR_DPI must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.jwt.secret.len() < 32 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_SECRET_KEY must be at least 32 characters in production"
                )));
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => default.map(str::to_string).ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!(format!("{} is required but not set", key)))
        }),
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {}", key, e))
        }),
        Err(_) => Ok(default),
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "ENVIRONMENT",
        "DATABASE_URL",
        "JWT_SECRET_KEY",
        "OCR_DPI",
        "ALLOWED_ORIGINS",
        "UPLOAD_RETENTION_SECONDS",
    ];

    fn clear() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn dev_defaults() {
        clear();
        env::set_var("DATABASE_URL", "postgres://localhost/statements");

        let config = StatementConfig::from_env().unwrap();

        assert_eq!(config.environment, Environment::Dev);
        assert_eq!(config.jwt.secret, DEV_JWT_SECRET);
        assert_eq!(config.jwt.access_token_expiry_minutes, 60);
        assert_eq!(config.storage.max_upload_bytes, 16 * 1024 * 1024);
        assert_eq!(config.storage.retention(), Duration::from_secs(3600));
        assert_eq!(config.ocr.dpi, 300);
        assert_eq!(config.ocr.max_concurrent, 2);
        assert!(config.database.run_migrations);
        clear();
    }

    #[test]
    #[serial]
    fn database_url_is_required() {
        clear();
        assert!(matches!(
            StatementConfig::from_env(),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    #[serial]
    fn prod_requires_explicit_secret() {
        clear();
        env::set_var("ENVIRONMENT", "prod");
        env::set_var("DATABASE_URL", "postgres://localhost/statements");
        assert!(StatementConfig::from_env().is_err());

        env::set_var("JWT_SECRET_KEY", "0123456789abcdef0123456789abcdef");
        assert!(StatementConfig::from_env().is_ok());

        env::set_var("ALLOWED_ORIGINS", "*");
        assert!(StatementConfig::from_env().is_err());
        clear();
    }

    #[test]
    #[serial]
    fn malformed_numbers_are_rejected() {
        clear();
        env::set_var("DATABASE_URL", "postgres://localhost/statements");
        env::set_var("OCR_DPI", "high");

        let err = StatementConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("OCR_DPI"));
        clear();
    }

    #[test]
    fn parses_environment_names() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!("development".parse::<Environment>().unwrap(), Environment::Dev);
        assert!("staging".parse::<Environment>().is_err());
    }
}
