use std::str::FromStr;

use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voxwire::net::{Endpoint, TransportConfig, DEFAULT_PORT};
use voxwire::world::{Authority, SceneBridge};
use voxwire::{LoopConfig, MetadataSink};

use super::headless::{LoggingBridge, LoggingPlayers};

const HOST_ENV_VAR: &str = "VOXWIRE_HOST";
const PORT_ENV_VAR: &str = "VOXWIRE_PORT";
const FALLBACK_HOST_ENV_VAR: &str = "VOXWIRE_FALLBACK_HOST";
const AUTHORITY_ENV_VAR: &str = "VOXWIRE_AUTHORITY";
const MAX_FRAMES_ENV_VAR: &str = "VOXWIRE_MAX_FRAMES_PER_TICK";
const TPS_ENV_VAR: &str = "VOXWIRE_TPS";
const DEFAULT_HOST: &str = "127.0.0.1";

pub(crate) struct AppWiring {
    pub(crate) config: LoopConfig,
    pub(crate) bridge: Box<dyn SceneBridge>,
    pub(crate) metadata: Box<dyn MetadataSink>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum ConfigError {
    #[error("{var}={value:?} is not a valid {expected}")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
}

pub(crate) fn build_app() -> AppWiring {
    init_tracing();
    info!("=== voxwire peer startup ===");

    AppWiring {
        config: loop_config_from(|key| std::env::var(key).ok()),
        bridge: Box::new(LoggingBridge::default()),
        metadata: Box::new(LoggingPlayers),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

/// Resolves every setting from `lookup`; bad values are logged and replaced by defaults.
fn loop_config_from<F>(lookup: F) -> LoopConfig
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = LoopConfig::default();

    let host = lookup(HOST_ENV_VAR)
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = setting_or_default(PORT_ENV_VAR, lookup(PORT_ENV_VAR), DEFAULT_PORT, parse_port);
    let fallback = lookup(FALLBACK_HOST_ENV_VAR)
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(|fallback_host| Endpoint::new(fallback_host, port));
    let authority = setting_or_default(
        AUTHORITY_ENV_VAR,
        lookup(AUTHORITY_ENV_VAR),
        defaults.authority,
        parse_authority,
    );
    let max_frames_per_tick = setting_or_default(
        MAX_FRAMES_ENV_VAR,
        lookup(MAX_FRAMES_ENV_VAR),
        defaults.max_frames_per_tick,
        parse_positive::<usize>,
    );
    let target_tps = setting_or_default(
        TPS_ENV_VAR,
        lookup(TPS_ENV_VAR),
        defaults.target_tps,
        parse_positive::<u32>,
    );

    LoopConfig {
        target_tps,
        max_frames_per_tick,
        authority,
        transport: TransportConfig {
            primary: Endpoint::new(host, port),
            fallback,
            ..TransportConfig::default()
        },
        ..defaults
    }
}

fn setting_or_default<T, P>(var: &'static str, raw: Option<String>, fallback: T, parse: P) -> T
where
    T: std::fmt::Debug,
    P: Fn(&'static str, &str) -> Result<T, ConfigError>,
{
    let Some(raw) = raw else {
        return fallback;
    };
    match parse(var, raw.trim()) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, fallback = ?fallback, "config_invalid_value_using_default");
            fallback
        }
    }
}

fn parse_port(var: &'static str, raw: &str) -> Result<u16, ConfigError> {
    let port = raw.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
        var,
        value: raw.to_string(),
        expected: "port",
    })?;
    if port == 0 {
        return Err(ConfigError::Zero { var });
    }
    Ok(port)
}

fn parse_authority(var: &'static str, raw: &str) -> Result<Authority, ConfigError> {
    Authority::parse(raw).ok_or_else(|| ConfigError::InvalidValue {
        var,
        value: raw.to_string(),
        expected: "authority (predictive|authoritative)",
    })
}

fn parse_positive<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr + Default + PartialEq,
{
    let value = raw.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        var,
        value: raw.to_string(),
        expected: "positive integer",
    })?;
    if value == T::default() {
        return Err(ConfigError::Zero { var });
    }
    Ok(value)
}
