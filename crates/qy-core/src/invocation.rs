//! The invocation record threaded through parsing and execution.
//!
//! Holds everything that would otherwise be process-global: the invocation
//! id, the environment snapshot, the secret scrubber, the set of deprecations
//! already reported and the events fired so far.

use crate::env_vars::{EnvSnapshot, SecretScrubber, ENGINE_ENV_PREFIX};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A structured event
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub name: String,
    pub level: EventLevel,
    pub message: String,
    pub extra: BTreeMap<String, String>,
}

impl Event {
    pub fn new(name: impl Into<String>, level: EventLevel, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level,
            message: message.into(),
            extra: BTreeMap::new(),
        }
    }
}

/// Invocation-wide context
#[derive(Debug)]
pub struct Invocation {
    pub invocation_id: String,
    pub started_at: DateTime<Utc>,
    env: EnvSnapshot,
    scrubber: SecretScrubber,
    extra: BTreeMap<String, String>,
    deprecations: Mutex<BTreeSet<String>>,
    events: Mutex<Vec<Event>>,
}

impl Invocation {
    pub fn new(env: EnvSnapshot) -> Self {
        let scrubber = env.scrubber();
        let extra = env.custom_env();
        Self {
            invocation_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            env,
            scrubber,
            extra,
            deprecations: Mutex::new(BTreeSet::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn from_process() -> Self {
        Self::new(EnvSnapshot::from_process())
    }

    pub fn env(&self) -> &EnvSnapshot {
        &self.env
    }

    pub fn scrub(&self, text: &str) -> String {
        self.scrubber.scrub(text)
    }

    /// Log an event with its `extra` map and record it
    pub fn fire(&self, mut event: Event) {
        event.message = self.scrub(&event.message);
        for (k, v) in &self.extra {
            event.extra.entry(k.clone()).or_insert_with(|| v.clone());
        }
        let extra = if event.extra.is_empty() {
            String::new()
        } else {
            format!(" {:?}", event.extra)
        };
        match event.level {
            EventLevel::Debug => log::debug!("[{}] {}{}", event.name, event.message, extra),
            EventLevel::Info => log::info!("[{}] {}{}", event.name, event.message, extra),
            EventLevel::Warn => log::warn!("[{}] {}{}", event.name, event.message, extra),
            EventLevel::Error => log::error!("[{}] {}{}", event.name, event.message, extra),
        }
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event);
    }

    /// Report a deprecation at most once per key
    pub fn deprecation(&self, key: &str, message: impl Into<String>) {
        let first = self
            .deprecations
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string());
        if first {
            let mut event = Event::new("Deprecation", EventLevel::Warn, message);
            event.extra.insert("deprecation".to_string(), key.to_string());
            self.fire(event);
        }
    }

    pub fn warn(&self, name: &str, message: impl Into<String>) {
        self.fire(Event::new(name, EventLevel::Warn, message));
    }

    /// Deprecations reported so far
    pub fn deprecations(&self) -> Vec<String> {
        self.deprecations
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Events fired so far
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Warn about engine-prefixed variables outside the allowed set
    pub fn validate_engine_env(&self) {
        for var in self.env.unknown_engine_vars() {
            self.deprecation(
                "environment-variable-namespace-deprecation",
                format!(
                    "Environment variable '{}' uses the reserved prefix '{}'",
                    var, ENGINE_ENV_PREFIX
                ),
            );
        }
    }
}

impl Default for Invocation {
    fn default() -> Self {
        Self::new(EnvSnapshot::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deprecation_fires_once_per_key() {
        let inv = Invocation::default();
        inv.deprecation("k", "first");
        inv.deprecation("k", "second");
        inv.deprecation("other", "third");
        assert_eq!(inv.deprecations(), vec!["k".to_string(), "other".to_string()]);
        assert_eq!(inv.events().len(), 2);
    }

    #[test]
    fn test_events_scrubbed_and_extra_attached() {
        let inv = Invocation::new(EnvSnapshot::from_pairs([
            ("DBT_ENV_SECRET_TOKEN", "s3cr3t"),
            ("DBT_ENV_CUSTOM_ENV_job", "nightly"),
        ]));
        inv.warn("ConnectionFailed", "token s3cr3t rejected");
        let events = inv.events();
        assert_eq!(events[0].message, "token ***** rejected");
        assert_eq!(events[0].extra.get("job").map(String::as_str), Some("nightly"));
    }

    #[test]
    fn test_engine_env_validation() {
        let inv = Invocation::new(EnvSnapshot::from_pairs([
            ("DBT_ENGINE_A", "1"),
            ("DBT_ENGINE_B", "1"),
        ]));
        inv.validate_engine_env();
        assert_eq!(
            inv.deprecations(),
            vec!["environment-variable-namespace-deprecation".to_string()]
        );
    }
}
