use std::collections::HashMap;
use std::env;

use thiserror::Error;
use url::Url;

pub const ENDPOINT_KEY: &str = "AWS_ENDPOINT";
pub const REGION_KEY: &str = "AWS_REGION";
pub const ACCESS_KEY_ID_KEY: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const PART_SIZE_KEY: &str = "AWS_PART_SIZE";
pub const MAX_CONCURRENCY_KEY: &str = "AWS_MAX_CONCURRENCY";
pub const FORCE_PATH_STYLE_KEY: &str = "AWS_FORCE_PATH_STYLE";

pub const DEFAULT_REGION: &str = "us-east-1";

// 5MB, the smallest part S3 accepts for anything but the last part
pub const DEFAULT_PART_SIZE: u64 = 5 * 1024 * 1024;

// 5GB, the largest single part S3 accepts
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Configuration input that failed validation.
///
/// Carries every violated constraint, not only the first one found.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid storage configuration: {}", .violations.join("; "))]
pub struct ValidationError {
    violations: Vec<String>,
}

impl ValidationError {
    pub fn violations(&self) -> &[String] {
        &self.violations
    }
}

/// Static access key pair used to sign requests
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .finish()
    }
}

/// Connection and transfer settings for the storage client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub endpoint: String,
    pub region: String,
    pub credentials: Credentials,
    pub part_size: u64,
    pub max_concurrency: usize,
    pub force_path_style: bool,
}

impl StorageConfig {
    /// Load configuration from the process environment and .env file
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if required variables are missing or invalid
    pub fn from_env() -> Result<Self, ValidationError> {
        dotenv::dotenv().ok(); // Load .env file if it exists

        Self::from_vars(env::vars())
    }

    /// Build a configuration from named values such as environment variables.
    ///
    /// Unknown keys are ignored, so the whole process environment can be passed in.
    /// Omitted optional keys fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] describing every missing or malformed value
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let mut violations = Vec::new();

        let endpoint = required(&vars, ENDPOINT_KEY, &mut violations);
        if let Some(Err(e)) = endpoint.as_deref().map(Self::validate_endpoint) {
            violations.push(e);
        }

        let access_key_id = required(&vars, ACCESS_KEY_ID_KEY, &mut violations);
        let secret_access_key = required(&vars, SECRET_ACCESS_KEY_KEY, &mut violations);

        let region = match vars.get(REGION_KEY) {
            Some(region) if region.trim().is_empty() => {
                violations.push(format!("{} cannot be empty", REGION_KEY));
                None
            }
            Some(region) => Some(region.clone()),
            None => Some(DEFAULT_REGION.to_string()),
        };

        let part_size = optional_positive(&vars, PART_SIZE_KEY, DEFAULT_PART_SIZE, &mut violations)
            .and_then(|n| {
                if n > MAX_PART_SIZE {
                    violations.push(format!(
                        "{} {} exceeds the maximum part size of {} bytes",
                        PART_SIZE_KEY, n, MAX_PART_SIZE
                    ));
                    None
                } else {
                    Some(n)
                }
            });
        let max_concurrency = optional_positive(
            &vars,
            MAX_CONCURRENCY_KEY,
            DEFAULT_MAX_CONCURRENCY as u64,
            &mut violations,
        )
        .and_then(|n| match usize::try_from(n) {
            Ok(n) => Some(n),
            Err(_) => {
                violations.push(format!("{} '{}' is too large", MAX_CONCURRENCY_KEY, n));
                None
            }
        });

        let force_path_style = match vars.get(FORCE_PATH_STYLE_KEY) {
            Some(raw) => match Self::parse_flag(raw) {
                Ok(flag) => Some(flag),
                Err(e) => {
                    violations.push(e);
                    None
                }
            },
            None => Some(false),
        };

        match (
            endpoint,
            region,
            access_key_id,
            secret_access_key,
            part_size,
            max_concurrency,
            force_path_style,
        ) {
            (
                Some(endpoint),
                Some(region),
                Some(access_key_id),
                Some(secret_access_key),
                Some(part_size),
                Some(max_concurrency),
                Some(force_path_style),
            ) if violations.is_empty() => Ok(Self {
                endpoint,
                region,
                credentials: Credentials {
                    access_key_id,
                    secret_access_key,
                },
                part_size,
                max_concurrency,
                force_path_style,
            }),
            _ => Err(ValidationError { violations }),
        }
    }

    /// Validate that the endpoint is an absolute URI
    fn validate_endpoint(endpoint: &str) -> Result<(), String> {
        match Url::parse(endpoint) {
            Ok(url) if url.cannot_be_a_base() => Err(format!(
                "{} '{}' must be an absolute URI (e.g., http://localhost:9000)",
                ENDPOINT_KEY, endpoint
            )),
            Ok(_) => Ok(()),
            Err(e) => Err(format!(
                "{} '{}' is not a valid URI: {}",
                ENDPOINT_KEY, endpoint, e
            )),
        }
    }

    fn parse_flag(raw: &str) -> Result<bool, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(format!(
                "{} '{}' must be one of true/false/1/0/yes/no",
                FORCE_PATH_STYLE_KEY, raw
            )),
        }
    }
}

fn required(
    vars: &HashMap<String, String>,
    key: &str,
    violations: &mut Vec<String>,
) -> Option<String> {
    match vars.get(key) {
        Some(value) if !value.trim().is_empty() => Some(value.clone()),
        Some(_) => {
            violations.push(format!("{} cannot be empty", key));
            None
        }
        None => {
            violations.push(format!("{} is required", key));
            None
        }
    }
}

fn optional_positive(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
    violations: &mut Vec<String>,
) -> Option<u64> {
    let Some(raw) = vars.get(key) else {
        return Some(default);
    };

    match raw.trim().parse::<u64>() {
        Ok(0) => {
            violations.push(format!("{} must be greater than zero", key));
            None
        }
        Ok(n) => Some(n),
        Err(_) => {
            violations.push(format!("{} '{}' is not a positive integer", key, raw));
            None
        }
    }
}
