//! Worker configuration resolved from named parameters or the environment
//!
//! Parameter names are dashed (`stream-name`); the environment form is the
//! upper-cased name with underscores (`STREAM_NAME`). Empty values count as
//! absent.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::{info, warn};

use crate::crypto::{SecureKey, AES_256_KEY_SIZE};
use crate::envelope::EncryptionContext;
use crate::error::ConfigError;

pub const STREAM_NAME_PARAM: &str = "stream-name";
pub const APP_NAME_PARAM: &str = "application-name";
pub const PROCESSOR_PARAM: &str = "record-processor";
pub const REGION_PARAM: &str = "region";
pub const MAX_RECORDS_PARAM: &str = "max-records";
pub const ENVIRONMENT_NAME_PARAM: &str = "environment-name";
pub const POSITION_IN_STREAM_PARAM: &str = "initial-position-in-stream";
pub const DECRYPTION_KEY_PARAM: &str = "kms-decryption-key-arn";
pub const ENCRYPTION_CONTEXT_PARAM: &str = "kms-encryption-context-hjson";
pub const VALIDATE_ENCRYPTION_CONTEXT_PARAM: &str = "validate-encryption-context-bool";
pub const MASTER_KEY_SEED_PARAM: &str = "master-key-seed-base64";

const ALL_PARAMS: [&str; 11] = [
    STREAM_NAME_PARAM,
    APP_NAME_PARAM,
    PROCESSOR_PARAM,
    REGION_PARAM,
    MAX_RECORDS_PARAM,
    ENVIRONMENT_NAME_PARAM,
    POSITION_IN_STREAM_PARAM,
    DECRYPTION_KEY_PARAM,
    ENCRYPTION_CONTEXT_PARAM,
    VALIDATE_ENCRYPTION_CONTEXT_PARAM,
    MASTER_KEY_SEED_PARAM,
];

pub const DEFAULT_MAX_RECORDS: usize = 10_000;

/// Where a shard starts reading when it has no checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialPosition {
    #[default]
    Latest,
    TrimHorizon,
}

impl std::str::FromStr for InitialPosition {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LATEST" => Ok(InitialPosition::Latest),
            "TRIM_HORIZON" => Ok(InitialPosition::TrimHorizon),
            other => Err(ConfigError::InvalidParameter {
                param: POSITION_IN_STREAM_PARAM,
                reason: format!("expected LATEST or TRIM_HORIZON, got {}", other),
            }),
        }
    }
}

/// Decryption settings; present only when a key identifier is configured
#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    pub key_id: String,
    pub context: EncryptionContext,
    pub validate_context: bool,
    pub master_key_seed: Option<SecureKey>,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub stream_name: String,
    pub application_name: String,
    pub processor: String,
    pub region: Option<String>,
    pub max_records: usize,
    pub environment: Option<String>,
    pub initial_position: InitialPosition,
    pub encryption: Option<EncryptionConfig>,
}

impl WorkerConfig {
    /// Resolve from the process environment, loading `.env` first if present
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            info!(path = %path.display(), "loaded environment file");
        }

        let params: HashMap<String, String> = ALL_PARAMS
            .iter()
            .filter_map(|name| {
                std::env::var(env_name(name))
                    .ok()
                    .map(|value| (name.to_string(), value))
            })
            .collect();
        Self::from_params(&params)
    }

    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            params
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let stream_name = get(STREAM_NAME_PARAM).ok_or(ConfigError::MissingParameter(STREAM_NAME_PARAM))?;
        let application_name = get(APP_NAME_PARAM).ok_or(ConfigError::MissingParameter(APP_NAME_PARAM))?;
        let processor = get(PROCESSOR_PARAM).ok_or(ConfigError::MissingParameter(PROCESSOR_PARAM))?;

        let max_records = match get(MAX_RECORDS_PARAM) {
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidParameter {
                        param: MAX_RECORDS_PARAM,
                        reason: format!("expected a positive integer, got {}", raw),
                    })
                }
            },
            None => DEFAULT_MAX_RECORDS,
        };

        let initial_position: InitialPosition = match get(POSITION_IN_STREAM_PARAM) {
            Some(raw) => raw.parse()?,
            None => InitialPosition::default(),
        };

        let context = get(ENCRYPTION_CONTEXT_PARAM);
        let validate = get(VALIDATE_ENCRYPTION_CONTEXT_PARAM);
        let seed = get(MASTER_KEY_SEED_PARAM);

        let encryption = match get(DECRYPTION_KEY_PARAM) {
            Some(key_id) => Some(EncryptionConfig {
                key_id,
                context: match context {
                    Some(raw) => parse_encryption_context(&raw)?,
                    None => EncryptionContext::new(),
                },
                validate_context: match validate {
                    Some(raw) => parse_bool(VALIDATE_ENCRYPTION_CONTEXT_PARAM, &raw)?,
                    None => true,
                },
                master_key_seed: seed.map(|raw| parse_seed(&raw)).transpose()?,
            }),
            None => {
                if context.is_some() || validate.is_some() || seed.is_some() {
                    warn!(
                        "encryption settings supplied without {}; records will not be decrypted",
                        DECRYPTION_KEY_PARAM
                    );
                }
                None
            }
        };

        Ok(Self {
            stream_name,
            application_name,
            processor,
            region: get(REGION_PARAM),
            max_records,
            environment: get(ENVIRONMENT_NAME_PARAM),
            initial_position,
            encryption,
        })
    }
}

/// `stream-name` → `STREAM_NAME`
pub fn env_name(param: &str) -> String {
    param.to_ascii_uppercase().replace('-', "_")
}

/// Parse a relaxed-JSON object of string values (comments, unquoted keys,
/// single quotes and trailing commas allowed)
pub fn parse_encryption_context(raw: &str) -> Result<EncryptionContext, ConfigError> {
    json5::from_str::<EncryptionContext>(raw).map_err(|e| ConfigError::EncryptionContext(e.to_string()))
}

fn parse_bool(param: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidParameter {
            param,
            reason: format!("expected a boolean, got {}", raw),
        }),
    }
}

fn parse_seed(raw: &str) -> Result<SecureKey, ConfigError> {
    let bytes = STANDARD.decode(raw).map_err(|e| ConfigError::InvalidParameter {
        param: MASTER_KEY_SEED_PARAM,
        reason: format!("invalid base64: {}", e),
    })?;
    if bytes.len() < AES_256_KEY_SIZE {
        return Err(ConfigError::InvalidParameter {
            param: MASTER_KEY_SEED_PARAM,
            reason: format!("seed must be at least {} bytes, got {}", AES_256_KEY_SIZE, bytes.len()),
        });
    }
    Ok(SecureKey::new(bytes))
}
