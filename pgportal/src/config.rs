//! Session configuration.
use std::env::var;

use crate::common::ByteStr;

const DEFAULT_JOBS_LOG_SIZE: usize = 1000;

/// Session configuration builder.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub(crate) user: ByteStr,
    pub(crate) read_only: bool,
    pub(crate) default_limit: u32,
    pub(crate) jobs_log_size: usize,
}

impl SessionConfig {
    /// Retrieve configuration from environment variable.
    ///
    /// It reads:
    /// - `PGUSER`, defaults to `crate`
    /// - `PGPORTAL_READ_ONLY`, one of `true`, `1` or `on` enables read-only
    /// - `PGPORTAL_DEFAULT_LIMIT`, defaults to `0` (no limit)
    /// - `PGPORTAL_JOBS_LOG_SIZE`, defaults to `1000`
    ///
    /// Malformed numbers fallback to the default value.
    pub fn from_env() -> SessionConfig {
        let user = var("PGUSER").map(Into::into).unwrap_or(ByteStr::from_static("crate"));

        let read_only = var("PGPORTAL_READ_ONLY")
            .map(|e| matches!(e.to_ascii_lowercase().as_str(), "true" | "1" | "on"))
            .unwrap_or(false);

        let default_limit = var("PGPORTAL_DEFAULT_LIMIT")
            .ok()
            .and_then(|e| e.parse().ok())
            .unwrap_or(0);

        let jobs_log_size = var("PGPORTAL_JOBS_LOG_SIZE")
            .ok()
            .and_then(|e| e.parse().ok())
            .unwrap_or(DEFAULT_JOBS_LOG_SIZE);

        Self { user, read_only, default_limit, jobs_log_size }
    }

    /// Get session user.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Returns `true` if only read operations are allowed.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Limit applied to queries without explicit `LIMIT`, `0` for none.
    pub fn default_limit(&self) -> u32 {
        self.default_limit
    }

    /// Number of finished jobs kept by [`JobsLogs`][crate::JobsLogs].
    pub fn jobs_log_size(&self) -> usize {
        self.jobs_log_size
    }

    /// Set session user.
    pub fn with_user(mut self, user: impl Into<ByteStr>) -> Self {
        self.user = user.into();
        self
    }

    /// Set read-only mode.
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Set default limit.
    pub fn with_default_limit(mut self, value: u32) -> Self {
        self.default_limit = value;
        self
    }

    /// Set jobs log size.
    pub fn with_jobs_log_size(mut self, value: usize) -> Self {
        self.jobs_log_size = value;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user: ByteStr::from_static("crate"),
            read_only: false,
            default_limit: 0,
            jobs_log_size: DEFAULT_JOBS_LOG_SIZE,
        }
    }
}
