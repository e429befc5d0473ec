//! How many concurrent warehouse sessions a batch may open.

use std::env;

use tracing::warn;

/// Environment variable overriding the configured session limit.
pub const SESSION_LIMIT_ENV: &str = "SQLBATCH_SESSION_LIMIT";

/// Session limit used when neither the environment nor configuration set one.
pub const DEFAULT_SESSION_LIMIT: usize = 4;

/// Reports the safe number of concurrent sessions against the warehouse.
pub trait SessionLimitProbe: Send + Sync {
    /// Safe number of concurrent sessions, always at least 1.
    fn session_limit(&self) -> usize;
}

/// A limit fixed at construction time.
#[derive(Clone, Copy, Debug)]
pub struct FixedSessionLimit(usize);

impl FixedSessionLimit {
    /// Creates a probe that always reports `limit` (raised to 1 if zero).
    pub fn new(limit: usize) -> Self {
        Self(limit.max(1))
    }
}

impl SessionLimitProbe for FixedSessionLimit {
    fn session_limit(&self) -> usize {
        self.0
    }
}

/// Environment first, then configuration, then [`DEFAULT_SESSION_LIMIT`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ConfiguredSessionLimit {
    configured: Option<usize>,
}

impl ConfiguredSessionLimit {
    /// Creates a probe with an optional configured limit.
    pub fn new(configured: Option<usize>) -> Self {
        Self { configured }
    }

    fn resolve(&self, from_env: Option<String>) -> usize {
        if let Some(raw) = from_env {
            match raw.trim().parse::<usize>() {
                Ok(limit) if limit > 0 => return limit,
                _ => warn!(value = %raw, "ignoring invalid {SESSION_LIMIT_ENV}"),
            }
        }
        match self.configured {
            Some(limit) if limit > 0 => limit,
            _ => DEFAULT_SESSION_LIMIT,
        }
    }
}

impl SessionLimitProbe for ConfiguredSessionLimit {
    fn session_limit(&self) -> usize {
        self.resolve(env::var(SESSION_LIMIT_ENV).ok())
    }
}
