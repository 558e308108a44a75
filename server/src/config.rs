// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{FixedOffset, Local, Offset};

pub const DEFAULT_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://taskdeck.db";
/// Quiet period after the last task change before pending remote writes
/// are retried.
pub const DEFAULT_SYNC_QUIET_PERIOD: Duration = Duration::from_millis(2000);

/// Connection details for the hosted backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub url: String,
    pub anon_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub addr: SocketAddr,
    pub database_url: String,
    /// `None` runs on the local store only.
    pub remote: Option<RemoteConfig>,
    pub sync_quiet_period: Duration,
    /// Offset used to decide which calendar day a timestamp falls on.
    pub utc_offset: FixedOffset,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let addr = get("TASKDECK_ADDR")
            .unwrap_or_else(|| DEFAULT_ADDR.to_string())
            .parse()
            .context("TASKDECK_ADDR is not a valid socket address")?;

        let database_url =
            get("TASKDECK_DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let remote = match (get("SUPABASE_URL"), get("SUPABASE_ANON_KEY")) {
            (Some(url), Some(anon_key)) => Some(RemoteConfig { url, anon_key }),
            (Some(_), None) | (None, Some(_)) => {
                tracing::warn!(
                    "Only one of SUPABASE_URL / SUPABASE_ANON_KEY is set; running on local storage."
                );
                None
            }
            (None, None) => None,
        };

        let sync_quiet_period = match get("TASKDECK_SYNC_QUIET_MS") {
            Some(ms) => Duration::from_millis(
                ms.parse()
                    .context("TASKDECK_SYNC_QUIET_MS must be a number of milliseconds")?,
            ),
            None => DEFAULT_SYNC_QUIET_PERIOD,
        };

        let utc_offset = match get("TASKDECK_UTC_OFFSET_MINUTES") {
            Some(minutes) => {
                let minutes: i32 = minutes
                    .parse()
                    .context("TASKDECK_UTC_OFFSET_MINUTES must be a whole number")?;
                FixedOffset::east_opt(minutes * 60)
                    .context("TASKDECK_UTC_OFFSET_MINUTES is out of range")?
            }
            None => Local::now().offset().fix(),
        };

        Ok(Self {
            addr,
            database_url,
            remote,
            sync_quiet_period,
            utc_offset,
        })
    }
}
