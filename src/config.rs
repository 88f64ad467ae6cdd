//! Process configuration from the environment

use crate::driver::{TurnLimits, DEFAULT_MAX_CAPABILITY_ROUNDS, DEFAULT_MAX_STEPS};
use crate::llm::LlmConfig;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_SESSION: &str = "cli";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub limits: TurnLimits,
    pub db_path: PathBuf,
    pub listings_path: Option<PathBuf>,
    pub session: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset and empty values take defaults
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let number = |name: &'static str, default: u32| -> Result<u32, ConfigError> {
            match var(name) {
                None => Ok(default),
                Some(value) => value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber { name, value }),
            }
        };

        let limits = TurnLimits {
            max_steps: number("DOMUS_MAX_STEPS", DEFAULT_MAX_STEPS)?,
            max_capability_rounds: number(
                "DOMUS_MAX_CAPABILITY_ROUNDS",
                DEFAULT_MAX_CAPABILITY_ROUNDS,
            )?,
        };

        let db_path = var("DOMUS_DB_PATH").map_or_else(
            || {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".domus").join("sessions.db")
            },
            PathBuf::from,
        );

        Ok(Self {
            llm: LlmConfig {
                openai_api_key: var("OPENAI_API_KEY"),
                gateway: var("LLM_GATEWAY"),
                default_model: var("DEFAULT_MODEL"),
            },
            limits,
            db_path,
            listings_path: var("DOMUS_LISTINGS_PATH").map(PathBuf::from),
            session: var("DOMUS_SESSION").unwrap_or_else(|| DEFAULT_SESSION.to_string()),
        })
    }
}
