use crate::error::AppError;
use crate::moderation::{FraudEscalation, RulePolicy};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,
    pub environment: String,
    pub port: u16,
    /// In-memory store when unset
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Shared secret of the identity issuer (HS256)
    pub jwt_secret: String,
    /// JSON rule table; built-in rules when unset
    pub rules_path: Option<PathBuf>,
    pub rules_reload_interval: Duration,
    pub platform_domains: Vec<String>,
    pub fraud_escalation: FraudEscalation,
    pub typing_ttl: Duration,
    pub max_message_length: usize,
    /// Messages replayed on join
    pub history_limit: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key/value source; `from_env` feeds it the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::Config("JWT_SECRET missing".into()))?;

        let port = parse_or(&lookup, "PORT", 8085)?;
        let db_max_connections = parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?;
        let rules_reload_secs: u64 = parse_or(&lookup, "RULES_RELOAD_INTERVAL_SECS", 10)?;
        let typing_ttl_ms: u64 = parse_or(&lookup, "TYPING_TTL_MS", 3000)?;
        let max_message_length = parse_or(&lookup, "MAX_MESSAGE_LENGTH", 2000)?;
        let history_limit = parse_or(&lookup, "HISTORY_LIMIT", 500)?;

        let fraud_escalation = match lookup("FRAUD_ESCALATION") {
            Some(value) => value.trim().parse().map_err(AppError::Config)?,
            None => FraudEscalation::default(),
        };

        if typing_ttl_ms == 0 {
            return Err(AppError::Config("TYPING_TTL_MS must be positive".into()));
        }

        Ok(Self {
            service_name: lookup("SERVICE_NAME")
                .unwrap_or_else(|| "marketplace-chat-service".to_string()),
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            port,
            database_url: lookup("DATABASE_URL").filter(|s| !s.trim().is_empty()),
            db_max_connections,
            jwt_secret,
            rules_path: lookup("RULES_PATH")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            rules_reload_interval: Duration::from_secs(rules_reload_secs.max(1)),
            platform_domains: lookup("PLATFORM_DOMAINS")
                .map(|value| parse_list(&value))
                .unwrap_or_default(),
            fraud_escalation,
            typing_ttl: Duration::from_millis(typing_ttl_ms),
            max_message_length,
            history_limit,
        })
    }

    /// Settings for tests and local tooling: in-memory store, built-in rules.
    pub fn test_defaults() -> Self {
        Self {
            service_name: "marketplace-chat-service".to_string(),
            environment: "test".to_string(),
            port: 0,
            database_url: None,
            db_max_connections: 1,
            jwt_secret: "test-secret".to_string(),
            rules_path: None,
            rules_reload_interval: Duration::from_secs(10),
            platform_domains: vec!["mercadoautos.com".to_string()],
            fraud_escalation: FraudEscalation::WithContact,
            typing_ttl: Duration::from_millis(3000),
            max_message_length: 2000,
            history_limit: 500,
        }
    }

    pub fn rule_policy(&self) -> RulePolicy {
        RulePolicy {
            platform_domains: self.platform_domains.clone(),
            fraud_escalation: self.fraud_escalation,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw}"))),
        None => Ok(default),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_lookup(lookup_from(&[("JWT_SECRET", "s3cret")])).unwrap();

        assert_eq!(config.port, 8085);
        assert!(config.database_url.is_none());
        assert!(config.rules_path.is_none());
        assert_eq!(config.typing_ttl, Duration::from_millis(3000));
        assert_eq!(config.max_message_length, 2000);
        assert_eq!(config.history_limit, 500);
        assert_eq!(config.fraud_escalation, FraudEscalation::WithContact);
        assert!(config.platform_domains.is_empty());
    }

    #[test]
    fn test_jwt_secret_required() {
        let result = Config::from_lookup(lookup_from(&[("PORT", "9000")]));
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_explicit_values() {
        let config = Config::from_lookup(lookup_from(&[
            ("JWT_SECRET", "s3cret"),
            ("PORT", "9100"),
            ("DATABASE_URL", "postgres://localhost/chat"),
            ("RULES_PATH", "/etc/chat/rules.json"),
            ("PLATFORM_DOMAINS", "MercadoAutos.com, cdn.mercadoautos.com,,"),
            ("FRAUD_ESCALATION", "always"),
            ("TYPING_TTL_MS", "1500"),
        ]))
        .unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/chat"));
        assert_eq!(config.rules_path, Some(PathBuf::from("/etc/chat/rules.json")));
        assert_eq!(
            config.platform_domains,
            vec!["mercadoautos.com".to_string(), "cdn.mercadoautos.com".to_string()]
        );
        assert_eq!(config.fraud_escalation, FraudEscalation::Always);
        assert_eq!(config.typing_ttl, Duration::from_millis(1500));
        assert_eq!(config.rule_policy().platform_domains.len(), 2);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_lookup(lookup_from(&[("JWT_SECRET", "s"), ("PORT", "eighty")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[
            ("JWT_SECRET", "s"),
            ("FRAUD_ESCALATION", "sometimes")
        ]))
        .is_err());
        assert!(Config::from_lookup(lookup_from(&[("JWT_SECRET", "s"), ("TYPING_TTL_MS", "0")])).is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_reads_process_environment() {
        env::set_var("JWT_SECRET", "env-secret");
        env::set_var("MAX_MESSAGE_LENGTH", "512");

        let config = Config::from_env().unwrap();
        assert_eq!(config.jwt_secret, "env-secret");
        assert_eq!(config.max_message_length, 512);

        env::remove_var("JWT_SECRET");
        env::remove_var("MAX_MESSAGE_LENGTH");
    }
}
