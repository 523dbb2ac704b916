use std::net::SocketAddr;

use thiserror::Error;

const DEFAULT_TABLE_NAME: &str = "user-table";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const LAMBDA_STAGE_PREFIX: &str = "/Prod";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Unknown USER_STORE backend: {0} (expected memory or dynamodb)")]
    UnknownStore(String),

    #[error("Invalid BIND_ADDR {0}: {1}")]
    InvalidBindAddr(String, String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    DynamoDb,
}

/// Service settings, read once from the environment at start-up.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub store: StoreBackend,
    pub dynamo_table: String,
    pub bind_addr: SocketAddr,
    pub seed_data: bool,
    pub remove_base_path: bool,
    /// Set when running inside AWS Lambda
    pub lambda_function: Option<String>,
}

fn is_true(value: Option<String>) -> bool {
    value.map(|v| v.to_lowercase() == "true").unwrap_or(false)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, which keeps tests off the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store = match lookup("USER_STORE").map(|v| v.to_lowercase()).as_deref() {
            None | Some("memory") => StoreBackend::Memory,
            Some("dynamodb") => StoreBackend::DynamoDb,
            Some(other) => return Err(ConfigError::UnknownStore(other.to_string())),
        };

        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr
            .parse()
            .map_err(|e: std::net::AddrParseError| {
                ConfigError::InvalidBindAddr(bind_addr.clone(), e.to_string())
            })?;

        Ok(Self {
            store,
            dynamo_table: lookup("DYNAMODB_USER_TABLE")
                .unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
            bind_addr,
            seed_data: is_true(lookup("SEED_DATA")),
            remove_base_path: is_true(lookup("REMOVE_BASE_PATH")),
            lambda_function: lookup("AWS_LAMBDA_FUNCTION_NAME"),
        })
    }

    pub fn is_lambda(&self) -> bool {
        self.lambda_function.is_some()
    }

    /// API Gateway stage prefix. Only applies under Lambda, and
    /// REMOVE_BASE_PATH=true drops it there too.
    pub fn route_prefix(&self) -> &'static str {
        if self.is_lambda() && !self.remove_base_path {
            LAMBDA_STAGE_PREFIX
        } else {
            ""
        }
    }
}
