//! Environment variables with special meaning to quarry.

use std::collections::BTreeMap;

/// Values of variables with this prefix are secrets and scrubbed from output
pub const SECRET_ENV_PREFIX: &str = "DBT_ENV_SECRET_";

/// Variables with this prefix are attached to every event's `extra` map
pub const CUSTOM_ENV_PREFIX: &str = "DBT_ENV_CUSTOM_ENV_";

/// Reserved namespace for engine settings
pub const ENGINE_ENV_PREFIX: &str = "DBT_ENGINE_";

/// Overrides the seed hashing cap, in MiB
pub const MAXIMUM_SEED_SIZE_ENV: &str = "DBT_MAXIMUM_SEED_SIZE";

/// Engine variables quarry reads; everything else under the prefix is reported
const ALLOWED_ENGINE_VARS: &[&str] = &[];

const DEFAULT_MAXIMUM_SEED_SIZE_MIB: u64 = 1;

/// Replacement text for scrubbed secrets
pub const SCRUBBED: &str = "*****";

/// A frozen copy of the process environment
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Non-empty secret values
    pub fn secrets(&self) -> Vec<String> {
        self.vars
            .iter()
            .filter(|(k, v)| k.starts_with(SECRET_ENV_PREFIX) && !v.is_empty())
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// `DBT_ENV_CUSTOM_ENV_*` variables with the prefix stripped
    pub fn custom_env(&self) -> BTreeMap<String, String> {
        self.vars
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(CUSTOM_ENV_PREFIX)
                    .map(|stripped| (stripped.to_string(), v.clone()))
            })
            .collect()
    }

    /// Engine-prefixed variables that quarry does not recognize
    pub fn unknown_engine_vars(&self) -> Vec<String> {
        self.vars
            .keys()
            .filter(|k| k.starts_with(ENGINE_ENV_PREFIX) && !ALLOWED_ENGINE_VARS.contains(&k.as_str()))
            .cloned()
            .collect()
    }

    /// Seed size cap in bytes; malformed values fall back to the default
    pub fn maximum_seed_size_bytes(&self) -> u64 {
        let mib = match self.get(MAXIMUM_SEED_SIZE_ENV) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(v) if v > 0 => v,
                _ => {
                    log::warn!(
                        "Ignoring invalid {}='{}'; using {} MiB",
                        MAXIMUM_SEED_SIZE_ENV,
                        raw,
                        DEFAULT_MAXIMUM_SEED_SIZE_MIB
                    );
                    DEFAULT_MAXIMUM_SEED_SIZE_MIB
                }
            },
            None => DEFAULT_MAXIMUM_SEED_SIZE_MIB,
        };
        mib.saturating_mul(1024 * 1024)
    }

    pub fn scrubber(&self) -> SecretScrubber {
        SecretScrubber::new(self.secrets())
    }
}

/// Replaces secret values with `*****`
#[derive(Debug, Clone, Default)]
pub struct SecretScrubber {
    secrets: Vec<String>,
}

impl SecretScrubber {
    pub fn new(mut secrets: Vec<String>) -> Self {
        secrets.retain(|s| !s.is_empty());
        // longest first
        secrets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        secrets.dedup();
        Self { secrets }
    }

    pub fn scrub(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.secrets {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), SCRUBBED);
            }
        }
        out
    }
}

#[cfg(test)]
#[path = "env_vars_test.rs"]
mod tests;
