use {
    crate::{
        domain::{catalog::{DEFAULT_TRIAL_DAYS, ProductCatalog}, provider::Provider},
        services::reconciliation::RetryPolicy,
    },
    secrecy::{ExposeSecret, SecretString},
    std::{collections::HashMap, env, net::SocketAddr, str::FromStr, time::Duration},
    thiserror::Error,
};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Everything read from the environment, once, at start-up.
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub store_a_webhook_secret: SecretString,
    pub store_b_webhook_secret: SecretString,
    pub client_jwt_secret: SecretString,
    pub worker_concurrency: usize,
    pub retry: RetryPolicy,
    pub catalog: ProductCatalog,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same rules as `from_env` against any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let worker_concurrency: usize = parse_or(&lookup, "WORKER_CONCURRENCY", 2)?;
        if worker_concurrency == 0 {
            return Err(ConfigError::Invalid {
                name: "WORKER_CONCURRENCY",
                reason: "must be at least 1".into(),
            });
        }
        let max_attempts: u32 = parse_or(&lookup, "RECONCILE_MAX_ATTEMPTS", 4)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "RECONCILE_MAX_ATTEMPTS",
                reason: "must be at least 1".into(),
            });
        }

        let overrides = match lookup("PRODUCT_PLANS") {
            Some(raw) => ProductCatalog::parse_overrides(&raw).map_err(|e| ConfigError::Invalid {
                name: "PRODUCT_PLANS",
                reason: e.to_string(),
            })?,
            None => HashMap::new(),
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            bind_addr: parse_or(&lookup, "BIND_ADDR", parse_default(DEFAULT_BIND_ADDR)?)?,
            store_a_webhook_secret: SecretString::new(required("STORE_A_WEBHOOK_SECRET")?.into_boxed_str()),
            store_b_webhook_secret: SecretString::new(required("STORE_B_WEBHOOK_SECRET")?.into_boxed_str()),
            client_jwt_secret: SecretString::new(required("CLIENT_JWT_SECRET")?.into_boxed_str()),
            worker_concurrency,
            retry: RetryPolicy {
                max_attempts,
                base_backoff: Duration::from_millis(parse_or(
                    &lookup,
                    "RECONCILE_BASE_BACKOFF_MS",
                    50,
                )?),
                attempt_timeout: Duration::from_millis(parse_or(
                    &lookup,
                    "PERSISTENCE_TIMEOUT_MS",
                    3000,
                )?),
            },
            catalog: ProductCatalog::new(
                overrides,
                parse_or(&lookup, "TRIAL_DAYS", DEFAULT_TRIAL_DAYS)?,
            ),
        })
    }

    pub fn webhook_secrets(&self) -> HashMap<Provider, SecretString> {
        HashMap::from([
            (Provider::StoreA, copy_secret(&self.store_a_webhook_secret)),
            (Provider::StoreB, copy_secret(&self.store_b_webhook_secret)),
        ])
    }
}

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::new(secret.expose_secret().into())
}

fn parse_default(raw: &str) -> Result<SocketAddr, ConfigError> {
    raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
        name: "BIND_ADDR",
        reason: e.to_string(),
    })
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::domain::subscription::Plan};

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("DATABASE_URL", "postgres://localhost/subs"),
        ("STORE_A_WEBHOOK_SECRET", "a-secret"),
        ("STORE_B_WEBHOOK_SECRET", "b-secret"),
        ("CLIENT_JWT_SECRET", "client-secret"),
    ];

    #[test]
    fn defaults_apply() {
        let config = AppConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:3000");
        assert_eq!(config.worker_concurrency, 2);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_backoff, Duration::from_millis(50));
        assert_eq!(config.retry.attempt_timeout, Duration::from_secs(3));
        assert_eq!(config.catalog.trial_days(), 7);
        assert_eq!(config.client_jwt_secret.expose_secret(), "client-secret");
    }

    #[test]
    fn missing_secret_is_reported_by_name() {
        let err = AppConfig::from_lookup(lookup(&REQUIRED[..3])).err().unwrap();
        assert!(matches!(err, ConfigError::Missing("CLIENT_JWT_SECRET")));
    }

    #[test]
    fn bad_number_fails_start_up() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("WORKER_CONCURRENCY", "many"));
        let err = AppConfig::from_lookup(lookup(&pairs)).err().unwrap();
        assert!(matches!(err, ConfigError::Invalid { name: "WORKER_CONCURRENCY", .. }));
    }

    #[test]
    fn product_overrides_reach_the_catalog() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PRODUCT_PLANS", "com.acme.pro=yearly"));
        let config = AppConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.catalog.plan_for("com.acme.pro"), Some(Plan::Yearly));
    }
}
