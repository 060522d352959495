//! Access to platform-provided configuration.
//!
//! Cloud Foundry hands applications their configuration through environment
//! variables carrying JSON payloads: `VCAP_APPLICATION`, `VCAP_SERVICES` and
//! any number of custom blobs (`cfboot_postgres`, `cfboot_redis`, ...). The
//! [`Settings`] accessor parses these once, caches the results and exposes
//! path-based lookups into the nested JSON values.
//!
//! ```rust,ignore
//! let settings = cfboot::config::app_settings();
//! let level = settings.get_string_env("cfboot_logging", &["level"]);
//! let uri = settings.postgres_uri(None);
//! ```

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::sync::{LazyLock, Mutex};

mod vcap;

pub use vcap::{Service, VcapApplication, VcapServices};

static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::from_env);

/// Returns the process-wide [`Settings`] instance, built lazily from the
/// current environment.
pub fn app_settings() -> &'static Settings {
    &SETTINGS
}

/// Caches and exposes environment-variable and service-URI lookups.
pub struct Settings {
    pub app: Option<VcapApplication>,
    pub services: VcapServices,

    // Resolved lookups, keyed by "env_<name>", "name_<name>" or "label_<label>".
    cache: Mutex<HashMap<String, Value>>,
}

impl Settings {
    pub fn from_env() -> Self {
        Settings {
            app: VcapApplication::from_env(),
            services: VcapServices::from_env(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Builds settings from raw JSON payloads instead of the process
    /// environment. Mostly useful in tests.
    pub fn from_parts(app: Option<VcapApplication>, services: VcapServices) -> Self {
        Settings {
            app,
            services,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached_env(&self, name: &str) -> Value {
        let mut cache = self.cache.lock().expect("settings cache poisoned");
        let key = format!("env_{}", name);

        if let Some(value) = cache.get(&key) {
            return value.clone();
        }

        let value = match env::var(name) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
            Err(_) => Value::Null,
        };

        cache.insert(key, value.clone());
        value
    }

    /// Reads the environment variable `name`. If its value parses as JSON and
    /// a path is given, the nested value at that path is returned. A value
    /// that is not valid JSON is returned as a string. Missing variables and
    /// dangling paths yield `Value::Null`.
    pub fn get_env(&self, name: &str, path: &[&str]) -> Value {
        let value = self.cached_env(name);
        if path.is_empty() {
            return value;
        }

        traverse(path, &value).cloned().unwrap_or(Value::Null)
    }

    /// Like [`get_env`](Self::get_env), coerced to a string. Numbers and
    /// booleans are stringified; `null` becomes the empty string.
    pub fn get_string_env(&self, name: &str, path: &[&str]) -> String {
        match self.get_env(name, path) {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Like [`get_env`](Self::get_env), coerced to a boolean. Accepts JSON
    /// booleans and the usual string spellings ("true", "TRUE", "t", "1");
    /// anything else yields `false`.
    pub fn get_bool_env(&self, name: &str, path: &[&str]) -> bool {
        match self.get_env(name, path) {
            Value::Bool(b) => b,
            Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "1" | "t" | "true"),
            _ => false,
        }
    }

    /// Like [`get_env`](Self::get_env), coerced to an integer. Unparsable
    /// values yield 0.
    pub fn get_int_env(&self, name: &str, path: &[&str]) -> i64 {
        match self.get_env(name, path) {
            Value::Number(n) => n.as_i64().unwrap_or(0),
            Value::String(s) => s.parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Deserializes a custom JSON env blob (e.g. `cfboot_redis`) into a
    /// per-module settings struct. A missing or empty variable falls back to
    /// the struct's defaults; anything else must be a JSON object.
    pub fn parse<T>(&self, name: &str) -> anyhow::Result<T>
    where
        T: DeserializeOwned + Default,
    {
        match self.cached_env(name) {
            Value::Null => Ok(T::default()),
            Value::String(raw) if raw.trim().is_empty() => Ok(T::default()),
            value @ Value::Object(_) => serde_json::from_value(value)
                .with_context(|| format!("Cannot parse settings from '{}'", name)),
            other => Err(anyhow::anyhow!(
                "The environment variable '{}' does not hold a JSON object: {}",
                name,
                other
            )),
        }
    }

    /// Finds a bound service by name, falling back to the first service
    /// bound under `fallback_label`.
    pub fn get_service(&self, name: &str, fallback_label: &str) -> Option<Service> {
        if !name.is_empty()
            && let Some(service) = self.services.with_name(name)
        {
            return Some(service.clone());
        }

        self.services.with_label(fallback_label).first().cloned()
    }

    fn uri_by_name(&self, name: &str) -> String {
        let mut cache = self.cache.lock().expect("settings cache poisoned");
        let key = format!("name_{}", name);

        if let Some(Value::String(uri)) = cache.get(&key) {
            return uri.clone();
        }

        let uri = self
            .services
            .with_name(name)
            .and_then(Service::uri)
            .unwrap_or_default();
        cache.insert(key, Value::String(uri.clone()));
        uri
    }

    fn uri_by_label(&self, label: &str) -> String {
        let mut cache = self.cache.lock().expect("settings cache poisoned");
        let key = format!("label_{}", label);

        if let Some(Value::String(uri)) = cache.get(&key) {
            return uri.clone();
        }

        let uri = self
            .services
            .with_label(label)
            .first()
            .and_then(|service| service.uri())
            .unwrap_or_default();
        cache.insert(key, Value::String(uri.clone()));
        uri
    }

    /// Resolves a service URI. An explicit name takes precedence; otherwise
    /// the first label with a non-empty `uri` credential wins.
    pub fn uri(&self, labels: &[&str], name: Option<&str>) -> String {
        if let Some(name) = name.filter(|name| !name.is_empty()) {
            return self.uri_by_name(name);
        }

        labels
            .iter()
            .map(|label| self.uri_by_label(label))
            .find(|uri| !uri.is_empty())
            .unwrap_or_default()
    }

    pub fn postgres_uri(&self, name: Option<&str>) -> String {
        self.uri(&["postgres"], name)
    }

    pub fn rabbitmq_uri(&self, name: Option<&str>) -> String {
        self.uri(&["rabbitmq-36", "p-rabbitmq-35"], name)
    }

    pub fn service_uri(&self, name: &str) -> String {
        self.uri(&[name], Some(name))
    }
}

/// Recursive descent through nested JSON values. Each path segment names an
/// object key; on arrays, segments must parse as indexes. Any mismatch ends
/// the walk with `None`.
fn traverse<'a>(path: &[&str], value: &'a Value) -> Option<&'a Value> {
    let Some((head, rest)) = path.split_first() else {
        return Some(value);
    };

    let next = match value {
        Value::Array(items) => head.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        Value::Object(map) => map.get(*head),
        _ => None,
    }?;

    traverse(rest, next)
}
