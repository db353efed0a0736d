use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub mongodb: MongoConfig,
    /// Base URL of the front-end; lifecycle links and CORS are derived from it.
    pub audience: String,
    pub jwt: JwtConfig,
    pub mailer: MailerConfig,
    pub store_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

#[derive(Clone, Deserialize)]
pub struct MongoConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: String,
}

impl std::fmt::Debug for MongoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .finish()
    }
}

impl MongoConfig {
    pub fn uri(&self) -> String {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => {
                format!("mongodb://{}:{}@{}:{}", user, password, self.host, self.port)
            }
            _ => format!("mongodb://{}:{}", self.host, self.port),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiry_hours: i64,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("expiry_hours", &self.expiry_hours)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct MailerConfig {
    pub from: String,
    pub smtp_enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_password: String,
}

impl std::fmt::Debug for MailerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailerConfig")
            .field("from", &self.from)
            .field("smtp_enabled", &self.smtp_enabled)
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_user", &self.smtp_user)
            .field("smtp_password", &"<redacted>")
            .finish()
    }
}

impl AccountConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let mut common_config = core_config::Config::load()?;
        if let Ok(port) = env::var("PORT") {
            common_config.port = parse("PORT", &port)?;
        }

        let environment: Environment = get_env("ENV", Some("development"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Production;

        let config = AccountConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("account-service"), false)?,
            service_version: get_env(
                "SERVICE_VERSION",
                Some(env!("CARGO_PKG_VERSION")),
                false,
            )?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: optional_env("OTLP_ENDPOINT"),
            mongodb: MongoConfig {
                host: get_env("MONGODB_HOST", Some("localhost"), is_prod)?,
                port: parse("MONGODB_PORT", &get_env("MONGODB_PORT", Some("27017"), is_prod)?)?,
                user: optional_env("MONGODB_USER"),
                password: optional_env("MONGODB_PASSWORD"),
                database: get_env("MONGODB_NAME", Some("accounts"), is_prod)?,
            },
            audience: get_env("AUDIENCE", Some("http://localhost:3000"), is_prod)?
                .trim_end_matches('/')
                .to_string(),
            jwt: JwtConfig {
                secret: get_env("JWT_SECRET", None, is_prod)?,
                expiry_hours: parse("JWT_EXPIRY", &get_env("JWT_EXPIRY", Some("24"), false)?)?,
            },
            mailer: MailerConfig {
                from: get_env("MAILER_FROM", Some("no-reply@localhost"), is_prod)?,
                smtp_enabled: get_env("SMTP_ENABLED", Some("false"), false)?
                    .parse()
                    .unwrap_or(false),
                smtp_host: get_env("SMTP_HOST", Some("localhost"), false)?,
                smtp_port: get_env("SMTP_PORT", Some("587"), false)?
                    .parse()
                    .unwrap_or(587),
                smtp_user: get_env("SMTP_USER", Some(""), false)?,
                smtp_password: get_env("SMTP_PASSWORD", Some(""), false)?,
            },
            store_timeout_seconds: get_env("STORE_TIMEOUT_SECONDS", Some("30"), false)?
                .parse()
                .unwrap_or(30),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.secret.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must not be empty"
            )));
        }

        if self.jwt.expiry_hours <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_EXPIRY must be a positive number of hours"
            )));
        }

        if self.store_timeout_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "STORE_TIMEOUT_SECONDS must be greater than 0"
            )));
        }

        if self.environment == Environment::Production && self.audience == "*" {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Wildcard CORS origin not allowed in production"
            )));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_seconds)
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse<T>(key: &str, value: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("invalid {}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_with_and_without_credentials() {
        let mut mongo = MongoConfig {
            host: "db".to_string(),
            port: 27017,
            user: None,
            password: None,
            database: "accounts".to_string(),
        };
        assert_eq!(mongo.uri(), "mongodb://db:27017");

        mongo.user = Some("root".to_string());
        mongo.password = Some("pw".to_string());
        assert_eq!(mongo.uri(), "mongodb://root:pw@db:27017");
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!(
            "development".parse::<Environment>().unwrap(),
            Environment::Development
        );
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Production);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_parse_reports_key() {
        let err = parse::<i64>("JWT_EXPIRY", "soon").unwrap_err();
        assert!(err.to_string().contains("JWT_EXPIRY"));
    }
}
