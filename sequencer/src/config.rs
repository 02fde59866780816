// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::time::Duration;

use alloy_primitives::Address;

const DEFAULT_PORT: u16 = 4001;
const DEFAULT_FINALIZE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 600;
const DEFAULT_SWEEP_RETENTION_SECS: u64 = 24 * 60 * 60;
const DEFAULT_MAX_BODY_BYTES: usize = 128 * 1024;

/// Service configuration, read once from the environment at boot.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// SQLite database path.
    pub database_url: String,
    pub rpc_url: String,
    /// Address of the StreamChannel contract.
    pub channel_manager: Address,
    /// Hex private key of the co-signing wallet; also pays settlement gas.
    pub sequencer_private_key: String,
    /// EIP-712 chain id; when unset the RPC-reported value is used.
    pub chain_id: Option<u64>,
    pub finalize_timeout: Duration,
    pub sweep_interval: Duration,
    pub sweep_retention: Duration,
    pub max_body_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Ok(Config {
            port: env_u16("PORT", DEFAULT_PORT)?,
            database_url: require_env("DATABASE_URL")?,
            rpc_url: require_env("RPC_URL")?,
            channel_manager: require_env("CHANNEL_MANAGER_ADDRESS")?
                .parse()
                .map_err(|err| format!("invalid CHANNEL_MANAGER_ADDRESS: {err}"))?,
            sequencer_private_key: require_env("SEQUENCER_PRIVATE_KEY")?,
            chain_id: optional_u64("CHAIN_ID")?,
            finalize_timeout: Duration::from_secs(env_u64(
                "FINALIZE_TIMEOUT_SECS",
                DEFAULT_FINALIZE_TIMEOUT_SECS,
            )?),
            sweep_interval: Duration::from_secs(env_u64(
                "SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            )?),
            sweep_retention: Duration::from_secs(env_u64(
                "SWEEP_RETENTION_SECS",
                DEFAULT_SWEEP_RETENTION_SECS,
            )?),
            max_body_bytes: env_usize("MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?,
        })
    }
}

fn require_env(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("missing environment variable: {key}"))
}

fn optional_u64(key: &str) -> Result<Option<u64>, String> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|err| format!("invalid {key}: {err}")),
        Err(_) => Ok(None),
    }
}

fn env_u16(key: &str, default: u16) -> Result<u16, String> {
    match std::env::var(key) {
        Ok(value) => value.parse().map_err(|err| format!("invalid {key}: {err}")),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64, String> {
    match std::env::var(key) {
        Ok(value) => value.parse().map_err(|err| format!("invalid {key}: {err}")),
        Err(_) => Ok(default),
    }
}

fn env_usize(key: &str, default: usize) -> Result<usize, String> {
    match std::env::var(key) {
        Ok(value) => value.parse().map_err(|err| format!("invalid {key}: {err}")),
        Err(_) => Ok(default),
    }
}
