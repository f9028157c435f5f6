//! Client settings from the environment
//!
//! A `.env` file in the working directory (or a parent) is loaded first;
//! variables already set in the process environment win over it.

use std::time::Duration;

use crate::core::config::{ControlAddress, DEFAULT_CONTROLLER_ADDRESS};
use crate::error::{ConfigError, ConfigResult};
use crate::services::connection::ConnectOptions;
use shared::WireFormat;

pub const ENV_CONTROL_ADDRESS: &str = "SWITCH_CONTROL_ADDRESS";
pub const ENV_CALL_TIMEOUT_MS: &str = "SWITCH_CALL_TIMEOUT_MS";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "SWITCH_CONNECT_TIMEOUT_MS";
pub const ENV_WIRE_FORMAT: &str = "SWITCH_WIRE_FORMAT";

/// Where and how the client connects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub control_address: ControlAddress,
    pub connect: ConnectOptions,
}

impl ClientSettings {
    pub fn from_env() -> ConfigResult<Self> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let address = lookup(ENV_CONTROL_ADDRESS).unwrap_or_else(|| DEFAULT_CONTROLLER_ADDRESS.to_string());
        let control_address = ControlAddress::parse(&address)?;

        let defaults = ConnectOptions::default();
        let connect = ConnectOptions {
            connect_timeout: millis(ENV_CONNECT_TIMEOUT_MS, lookup(ENV_CONNECT_TIMEOUT_MS))?
                .unwrap_or(defaults.connect_timeout),
            call_timeout: millis(ENV_CALL_TIMEOUT_MS, lookup(ENV_CALL_TIMEOUT_MS))?.unwrap_or(defaults.call_timeout),
            wire_format: match lookup(ENV_WIRE_FORMAT) {
                Some(raw) => raw.parse::<WireFormat>().map_err(|reason| ConfigError::Malformed {
                    field: ENV_WIRE_FORMAT,
                    value: raw.clone(),
                    reason,
                })?,
                None => defaults.wire_format,
            },
        };

        Ok(Self {
            control_address,
            connect,
        })
    }
}

fn millis(field: &'static str, raw: Option<String>) -> ConfigResult<Option<Duration>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::OutOfRange { field, value: raw }),
        Ok(ms) => Ok(Some(Duration::from_millis(ms))),
        Err(e) => Err(ConfigError::Malformed {
            field,
            value: raw,
            reason: e.to_string(),
        }),
    }
}
