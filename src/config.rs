//! Environment-style configuration
//!
//! Every setting is read through a lookup function so the same parsing runs
//! against `std::env` in production and a plain map in tests.
use crate::catalog::Catalog;
use crate::error::NotaryError;
use crate::pricing::DEFAULT_TAX_BASIS_POINTS;
use crate::storage::{CLIENT_UPLOADS_PREFIX, NOTARIZED_DOCS_PREFIX};

pub const DEFAULT_RETENTION_DAYS: u32 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutConfig {
    pub secret_key: Option<String>,
    pub success_url: Option<String>,
    pub failure_url: Option<String>,
    pub tax_basis_points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessConfig {
    pub staff_team_id: Option<String>,
    pub bucket_id: Option<String>,
}

/// Connection settings for the concrete storage client, which lives outside
/// this crate and is handed in as a [`BlobStore`](crate::storage::BlobStore).
/// Only `bucket_id` is read here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub project: Option<String>,
    pub api_key: Option<String>,
    pub bucket_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeConfig {
    pub bucket_id: Option<String>,
    pub retention_days: u32,
    pub scope_prefixes: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub checkout: CheckoutConfig,
    pub access: AccessConfig,
    pub storage: StorageConfig,
    pub purge: PurgeConfig,
    pub catalog: Catalog,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Upper bound for `TAX_RATE_BASIS_POINTS`, a 100 % rate.
pub const MAX_TAX_BASIS_POINTS: u32 = 10_000;

/// `0` is a real value ("purge immediately"). Fractional days keep their
/// whole-day part. Anything else, negatives included, falls back to the default.
pub fn parse_retention_days(raw: Option<&str>) -> u32 {
    let Some(raw) = raw.map(str::trim) else {
        return DEFAULT_RETENTION_DAYS;
    };
    if let Ok(days) = raw.parse::<u32>() {
        return days;
    }
    match raw.parse::<f64>() {
        Ok(days) if days.is_finite() && days >= 0.0 && days < f64::from(u32::MAX) => days.trunc() as u32,
        _ => DEFAULT_RETENTION_DAYS,
    }
}

pub fn parse_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes" | "on")
    )
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            bucket_id: None,
            retention_days: DEFAULT_RETENTION_DAYS,
            scope_prefixes: vec![
                CLIENT_UPLOADS_PREFIX.to_string(),
                NOTARIZED_DOCS_PREFIX.to_string(),
            ],
            dry_run: false,
        }
    }
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            success_url: None,
            failure_url: None,
            tax_basis_points: DEFAULT_TAX_BASIS_POINTS,
        }
    }
}

impl PurgeConfig {
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let scope = |key: &str, default: &str| non_empty(get(key)).unwrap_or_else(|| default.to_string());

        Self {
            bucket_id: non_empty(get("STORAGE_BUCKET_ID")),
            retention_days: parse_retention_days(get("RETENTION_DAYS").as_deref()),
            scope_prefixes: vec![
                scope("SCOPE_CLIENT_UPLOADS", CLIENT_UPLOADS_PREFIX),
                scope("SCOPE_NOTARIZED_DOCS", NOTARIZED_DOCS_PREFIX),
            ],
            dry_run: parse_flag(get("PURGE_DRY_RUN").as_deref()),
        }
    }

    pub fn bucket(&self) -> Result<&str, NotaryError> {
        self.bucket_id
            .as_deref()
            .ok_or_else(|| NotaryError::misconfigured("storage bucket id missing"))
    }
}

impl Settings {
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, NotaryError> {
        let bucket_id = non_empty(get("STORAGE_BUCKET_ID"));

        let tax_basis_points = match non_empty(get("TAX_RATE_BASIS_POINTS")) {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|bp| *bp <= MAX_TAX_BASIS_POINTS)
                .ok_or_else(|| NotaryError::misconfigured(format!("invalid TAX_RATE_BASIS_POINTS: {raw}")))?,
            None => DEFAULT_TAX_BASIS_POINTS,
        };

        let catalog = match non_empty(get("CATALOG_JSON")) {
            Some(raw) => Catalog::from_json(&raw)
                .map_err(|e| NotaryError::misconfigured(format!("invalid CATALOG_JSON: {e}")))?,
            None => Catalog::builtin(),
        };

        Ok(Self {
            checkout: CheckoutConfig {
                secret_key: non_empty(get("PAYMENT_SECRET_KEY")),
                success_url: non_empty(get("CHECKOUT_SUCCESS_URL")),
                failure_url: non_empty(get("CHECKOUT_FAILURE_URL")),
                tax_basis_points,
            },
            access: AccessConfig {
                staff_team_id: non_empty(get("STAFF_TEAM_ID")),
                bucket_id: bucket_id.clone(),
            },
            storage: StorageConfig {
                endpoint: non_empty(get("STORAGE_ENDPOINT")),
                project: non_empty(get("STORAGE_PROJECT")),
                api_key: non_empty(get("STORAGE_API_KEY")),
                bucket_id,
            },
            purge: PurgeConfig::from_lookup(&get),
            catalog,
        })
    }

    pub fn from_env() -> Result<Self, NotaryError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}
