//! Key resolution: prefix, whitelist and per-key custom limits.

use std::collections::HashSet;
use std::time::Duration;

use regex::Regex;

use crate::config::loader::ConfigError;
use crate::config::schema::RateLimitConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    Whitelisted,
    Limited {
        storage_key: String,
        limit: u32,
        window: Duration,
    },
}

#[derive(Debug)]
struct CompiledLimit {
    pattern: Regex,
    limit: u32,
    window: Duration,
}

#[derive(Debug)]
pub(crate) struct KeyRules {
    prefix: String,
    whitelist: HashSet<String>,
    custom: Vec<CompiledLimit>,
    default_limit: u32,
    default_window: Duration,
}

impl KeyRules {
    pub(crate) fn new(config: &RateLimitConfig) -> Result<Self, ConfigError> {
        let custom = config
            .custom_limits
            .iter()
            .map(|c| {
                let pattern = Regex::new(&c.pattern).map_err(|source| ConfigError::InvalidPattern {
                    pattern: c.pattern.clone(),
                    source,
                })?;
                Ok(CompiledLimit {
                    pattern,
                    limit: c.max_requests,
                    window: Duration::from_millis(c.window_ms),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            prefix: config.key_prefix.clone(),
            whitelist: config.whitelist.iter().cloned().collect(),
            custom,
            default_limit: config.max_requests,
            default_window: config.window(),
        })
    }

    pub(crate) fn default_limit(&self) -> u32 {
        self.default_limit
    }

    pub(crate) fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// First matching custom limit wins; otherwise the default applies.
    pub(crate) fn resolve(&self, key: &str) -> Resolution {
        if self.whitelist.contains(key) {
            return Resolution::Whitelisted;
        }
        let (limit, window) = self
            .custom
            .iter()
            .find(|c| c.pattern.is_match(key))
            .map(|c| (c.limit, c.window))
            .unwrap_or((self.default_limit, self.default_window));

        Resolution::Limited {
            storage_key: self.storage_key(key),
            limit,
            window,
        }
    }
}
