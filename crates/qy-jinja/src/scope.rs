//! Per-render state shared by every callable registered for one render.

use crate::convert::value_to_json;
use minijinja::value::Value;
use qy_core::node::{RefCall, SourceCall};
use qy_core::{RenderEnv, Rendered};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Captured {
    refs: Vec<RefCall>,
    sources: Vec<SourceCall>,
    config: BTreeMap<String, Json>,
}

/// Calls captured while rendering plus the `return` frame stack.
///
/// Every macro call pushes a frame; `return(x)` fills the innermost empty
/// frame so the first return of a macro wins.
#[derive(Debug)]
pub(crate) struct RenderScope {
    pub env: RenderEnv,
    captured: Mutex<Captured>,
    frames: Mutex<Vec<Option<Value>>>,
}

impl RenderScope {
    pub fn new(env: RenderEnv) -> Self {
        Self {
            env,
            captured: Mutex::new(Captured::default()),
            frames: Mutex::new(vec![None]),
        }
    }

    pub fn record_ref(&self, call: RefCall) {
        let mut captured = self.captured.lock().unwrap_or_else(|p| p.into_inner());
        if !captured.refs.contains(&call) {
            captured.refs.push(call);
        }
    }

    pub fn record_source(&self, call: SourceCall) {
        let mut captured = self.captured.lock().unwrap_or_else(|p| p.into_inner());
        if !captured.sources.contains(&call) {
            captured.sources.push(call);
        }
    }

    pub fn record_config(&self, key: &str, value: Json) {
        let mut captured = self.captured.lock().unwrap_or_else(|p| p.into_inner());
        captured.config.insert(key.to_string(), value);
    }

    /// A config value set by `config(...)` during this render
    pub fn captured_config(&self, key: &str) -> Option<Json> {
        let captured = self.captured.lock().unwrap_or_else(|p| p.into_inner());
        captured.config.get(key).cloned()
    }

    pub fn push_frame(&self) {
        self.frames
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(None);
    }

    pub fn pop_frame(&self) -> Option<Value> {
        self.frames
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop()
            .flatten()
    }

    pub fn set_return(&self, value: Value) {
        let mut frames = self.frames.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(frame) = frames.last_mut() {
            if frame.is_none() {
                *frame = Some(value);
            }
        }
    }

    /// Drain the captures into a render result
    pub fn finish(&self, text: String) -> Rendered {
        let captured = std::mem::take(&mut *self.captured.lock().unwrap_or_else(|p| p.into_inner()));
        let return_value = self
            .frames
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .first()
            .cloned()
            .flatten()
            .map(|v| value_to_json(&v));
        Rendered {
            text,
            refs: captured.refs,
            sources: captured.sources,
            config: captured.config,
            return_value,
        }
    }
}
