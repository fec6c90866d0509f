// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the typed settings built from
//! them at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Root directory for node vaults and keys | `./data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `DISTRIBUTORS` | Comma-separated distributor names for the demo network | `Distributor-A,Distributor-B,Distributor-C` |
//! | `SESSION_ATTEMPTS` | Session attempts before certification | `3` |
//! | `RECEIVE_TIMEOUT_SECS` | Seconds to wait for a counterparty message | `30` |
//! | `FINALITY_RETRY_SECS` | Seconds between finality retry sweeps | `5` |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::paths::DATA_ROOT;

pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const DISTRIBUTORS_ENV: &str = "DISTRIBUTORS";
pub const SESSION_ATTEMPTS_ENV: &str = "SESSION_ATTEMPTS";
pub const RECEIVE_TIMEOUT_SECS_ENV: &str = "RECEIVE_TIMEOUT_SECS";
pub const FINALITY_RETRY_SECS_ENV: &str = "FINALITY_RETRY_SECS";

pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";
pub const DEFAULT_DISTRIBUTORS: &str = "Distributor-A,Distributor-B,Distributor-C";

/// Tunables of the custody protocol.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Attempts at opening or completing a required session before
    /// certification. After certification delivery is retried indefinitely.
    pub session_attempts: u32,
    /// Pause between pre-certification session attempts.
    pub retry_backoff: Duration,
    /// Upper bound on any single receive.
    pub receive_timeout: Duration,
    /// Interval between finality retry sweeps, and the first redelivery delay.
    pub finality_retry: Duration,
    /// Cap on the exponential redelivery delay.
    pub finality_retry_max: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            session_attempts: 3,
            retry_backoff: Duration::from_millis(250),
            receive_timeout: Duration::from_secs(30),
            finality_retry: Duration::from_secs(5),
            finality_retry_max: Duration::from_secs(300),
        }
    }
}

impl ProtocolConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            session_attempts: parse_env(SESSION_ATTEMPTS_ENV)
                .filter(|attempts: &u32| *attempts > 0)
                .unwrap_or(defaults.session_attempts),
            receive_timeout: parse_env(RECEIVE_TIMEOUT_SECS_ENV)
                .map(Duration::from_secs)
                .unwrap_or(defaults.receive_timeout),
            finality_retry: parse_env(FINALITY_RETRY_SECS_ENV)
                .map(Duration::from_secs)
                .unwrap_or(defaults.finality_retry),
            ..defaults
        }
    }

    /// Delay before redelivery attempt `attempt` (1-based), doubling each
    /// time up to `finality_retry_max`.
    pub fn finality_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.finality_retry
            .saturating_mul(factor)
            .min(self.finality_retry_max)
    }
}

/// Process-level settings for the demo network binary.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub json_logs: bool,
    pub distributors: Vec<String>,
}

impl NodeSettings {
    pub fn from_env() -> Self {
        Self {
            data_dir: env::var(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DATA_ROOT)),
            host: env::var(HOST_ENV).unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_env(PORT_ENV).unwrap_or(8080),
            json_logs: env::var(LOG_FORMAT_ENV)
                .map(|format| format.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            distributors: parse_distributors(
                &env::var(DISTRIBUTORS_ENV).unwrap_or_else(|_| DEFAULT_DISTRIBUTORS.to_string()),
            ),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok()?.trim().parse().ok()
}

/// Split a comma-separated list, dropping blanks and repeats.
pub fn parse_distributors(raw: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        if !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
    }
    names
}
