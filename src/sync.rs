use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::cache::{keys, Notifier, QueryCache};
use crate::error::SyncError;
use crate::events::SyncEvent;

/// Sections of the `init` event and the key each one replaces.
const INIT_SECTIONS: [(&str, &str); 4] = [
    ("queue", keys::QUEUE),
    ("settings", keys::SETTINGS),
    ("channels", keys::CHANNELS),
    ("import", keys::IMPORT),
];

/// Translates server events into cache writes.
///
/// Handlers never fail: a payload that does not parse is logged and the
/// cache is left exactly as it was.
#[derive(Clone)]
pub struct CacheSync {
    cache: Arc<dyn QueryCache>,
    notifier: Arc<dyn Notifier>,
}

impl CacheSync {
    pub fn new(cache: Arc<dyn QueryCache>, notifier: Arc<dyn Notifier>) -> Self {
        Self { cache, notifier }
    }

    pub fn dispatch(&self, event: &SyncEvent) {
        trace!(event = event.event_type(), "Dispatching sync event");
        match event {
            SyncEvent::Init(payload) => self.init(payload),
            SyncEvent::Queue(payload) => self.replace(keys::QUEUE, payload),
            SyncEvent::Settings(payload) => self.replace(keys::SETTINGS, payload),
            SyncEvent::Import(payload) => self.merge(keys::IMPORT, payload),
            SyncEvent::Videos(_) => self.invalidate(&[keys::VIDEOS, keys::FAVORITE_VIDEOS]),
            SyncEvent::Channels(_) => {
                self.invalidate(&[keys::CHANNELS, keys::FAVORITE_CHANNELS])
            }
            SyncEvent::Toast(payload) => self.dismiss_toast(payload),
            SyncEvent::Unknown { name, .. } => {
                debug!(event = %name, "Ignoring event with no handler");
            }
        }
    }

    pub fn replace(&self, key: &str, payload: &str) {
        match parse_payload(payload) {
            Ok(value) => self.cache.set_value(key, value),
            Err(e) => warn!(key, error = %e, "Dropping unparseable payload"),
        }
    }

    pub fn invalidate(&self, keys: &[&str]) {
        for key in keys {
            self.cache.mark_stale(key);
        }
    }

    /// Shallow-merges the fields of an object payload into the cached object.
    pub fn merge(&self, key: &str, payload: &str) {
        let patch = match parse_payload(payload) {
            Ok(Value::Object(patch)) => patch,
            Ok(other) => {
                warn!(key, kind = json_kind(&other), "Merge payload is not an object");
                return;
            }
            Err(e) => {
                warn!(key, error = %e, "Dropping unparseable payload");
                return;
            }
        };

        let mut merged = match self.cache.get_value(key) {
            Some(Value::Object(existing)) => existing,
            _ => Map::new(),
        };
        merged.extend(patch);
        self.cache.set_value(key, Value::Object(merged));
    }

    fn init(&self, payload: &str) {
        let sections = match parse_payload(payload) {
            Ok(Value::Object(sections)) => sections,
            Ok(other) => {
                warn!(kind = json_kind(&other), "Init payload is not an object");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Dropping unparseable init payload");
                return;
            }
        };

        for (section, key) in INIT_SECTIONS {
            if let Some(value) = sections.get(section) {
                self.cache.set_value(key, value.clone());
            }
        }

        // Favorites are sorted server-side and cannot be derived from the raw list
        if sections.contains_key("channels") {
            self.cache.mark_stale(keys::FAVORITE_CHANNELS);
        }
    }

    fn dismiss_toast(&self, payload: &str) {
        let id = match parse_payload(payload) {
            Ok(Value::String(id)) => id,
            Ok(Value::Number(n)) => n.to_string(),
            Ok(Value::Object(obj)) => match obj.get("id") {
                Some(Value::String(id)) => id.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => {
                    warn!("Toast payload has no id");
                    return;
                }
            },
            Ok(_) => {
                warn!("Toast payload has no id");
                return;
            }
            // Bare, unquoted ids are sent as plain text
            Err(_) => payload.trim().to_string(),
        };

        if id.is_empty() {
            warn!("Toast payload has an empty id");
            return;
        }
        debug!(%id, "Dismissing toast");
        self.notifier.remove_by_id(&id);
    }
}

fn parse_payload(payload: &str) -> Result<Value, SyncError> {
    Ok(serde_json::from_str(payload)?)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
