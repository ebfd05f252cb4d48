//! Configuration loading and representation.

use std::time::Duration;

use thiserror::Error;

use atelier_inventory::LedgerPolicy;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),

    #[error("invalid value for {name}: '{value}' ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Process configuration, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// `Some` when `USE_PERSISTENT_STORES=true`.
    pub database: Option<DatabaseConfig>,
    pub checkout_hold_minutes: i64,
    pub order_group_hold_minutes: i64,
    pub fallback_shipping_address: String,
    /// Default deadline applied to every service call.
    pub operation_timeout: Option<Duration>,
    pub ledger: LedgerPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: None,
            checkout_hold_minutes: 30,
            order_group_hold_minutes: 30,
            fallback_shipping_address: "Address not provided".to_string(),
            operation_timeout: None,
            ledger: LedgerPolicy::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Unset and blank values take
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let persistent = parse_or(&get, "USE_PERSISTENT_STORES", false)?;
        let database = if persistent {
            let url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
            Some(DatabaseConfig {
                url,
                max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10u32)?,
            })
        } else {
            None
        };

        Ok(Self {
            database,
            checkout_hold_minutes: parse_or(
                &get,
                "CHECKOUT_HOLD_MINUTES",
                defaults.checkout_hold_minutes,
            )?,
            order_group_hold_minutes: positive_minutes(
                "ORDER_GROUP_HOLD_MINUTES",
                parse_or(&get, "ORDER_GROUP_HOLD_MINUTES", defaults.order_group_hold_minutes)?,
            )?,
            fallback_shipping_address: get("FALLBACK_SHIPPING_ADDRESS")
                .unwrap_or(defaults.fallback_shipping_address),
            operation_timeout: get("OPERATION_TIMEOUT_MS")
                .map(|raw| parse::<u64>("OPERATION_TIMEOUT_MS", &raw))
                .transpose()?
                .map(Duration::from_millis),
            ledger: LedgerPolicy {
                ledger_initial_stock: parse_or(&get, "LEDGER_INITIAL_STOCK", false)?,
            },
        })
    }

    pub fn use_persistent_stores(&self) -> bool {
        self.database.is_some()
    }
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        Some(raw) => parse(name, &raw),
        None => Ok(default),
    }
}

fn positive_minutes(name: &'static str, minutes: i64) -> Result<i64, ConfigError> {
    if minutes <= 0 {
        return Err(ConfigError::Invalid {
            name,
            value: minutes.to_string(),
            reason: "must be > 0".to_string(),
        });
    }
    Ok(minutes)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = from(&[]).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert!(!cfg.use_persistent_stores());
    }

    #[test]
    fn persistent_stores_require_database_url() {
        assert_eq!(
            from(&[("USE_PERSISTENT_STORES", "true")]),
            Err(ConfigError::Missing("DATABASE_URL"))
        );

        let cfg = from(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/atelier"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
        ])
        .unwrap();
        let db = cfg.database.unwrap();
        assert_eq!(db.max_connections, 4);
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = from(&[
            ("CHECKOUT_HOLD_MINUTES", "45"),
            ("OPERATION_TIMEOUT_MS", "250"),
            ("LEDGER_INITIAL_STOCK", "true"),
            ("FALLBACK_SHIPPING_ADDRESS", "Pickup at studio"),
        ])
        .unwrap();
        assert_eq!(cfg.checkout_hold_minutes, 45);
        assert_eq!(cfg.operation_timeout, Some(Duration::from_millis(250)));
        assert!(cfg.ledger.ledger_initial_stock);
        assert_eq!(cfg.fallback_shipping_address, "Pickup at studio");
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(matches!(
            from(&[("LEDGER_INITIAL_STOCK", "maybe")]),
            Err(ConfigError::Invalid { name: "LEDGER_INITIAL_STOCK", .. })
        ));
        assert!(matches!(
            from(&[("ORDER_GROUP_HOLD_MINUTES", "0")]),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
