//! Typed views onto the `VCAP_APPLICATION` and `VCAP_SERVICES` payloads
//! provided by the Cloud Foundry platform.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::env;

/// Application metadata from `VCAP_APPLICATION`.
///
/// All fields default to empty when the variable is absent, so local runs
/// outside of Cloud Foundry work without any setup.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct VcapApplication {
    pub application_name: String,
    pub application_version: String,
    pub name: String,
    pub version: String,
    pub space_name: String,
    pub application_uris: Vec<String>,
}

/// Bound services from `VCAP_SERVICES`, keyed by service label.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct VcapServices(pub HashMap<String, Vec<Service>>);

/// A single bound service instance.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Service {
    pub name: String,
    pub label: String,
    pub plan: String,
    pub tags: Vec<String>,
    pub credentials: HashMap<String, Value>,
}

impl VcapApplication {
    pub fn from_env() -> Option<Self> {
        let raw = env::var("VCAP_APPLICATION").ok()?;
        serde_json::from_str(&raw).ok()
    }
}

impl VcapServices {
    pub fn from_env() -> Self {
        env::var("VCAP_SERVICES")
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    /// Finds a bound service by its instance name, across all labels.
    pub fn with_name(&self, name: &str) -> Option<&Service> {
        self.0
            .values()
            .flat_map(|services| services.iter())
            .find(|service| service.name == name)
    }

    /// Returns all services bound under the given label.
    pub fn with_label(&self, label: &str) -> &[Service] {
        self.0.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Finds a bound service carrying the given tag.
    pub fn with_tag(&self, tag: &str) -> Option<&Service> {
        self.0
            .values()
            .flat_map(|services| services.iter())
            .find(|service| service.tags.iter().any(|t| t == tag))
    }
}

impl Service {
    /// Reads a credential as a string.
    ///
    /// Cloud Foundry brokers are inconsistent about credential types: ports
    /// show up as JSON numbers or as strings depending on the broker. This
    /// accessor coerces numbers and booleans into their string form.
    pub fn credential_string(&self, key: &str) -> Option<String> {
        match self.credentials.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Reads a credential as an unsigned integer, accepting both JSON numbers
    /// and numeric strings.
    pub fn credential_u64(&self, key: &str) -> Option<u64> {
        match self.credentials.get(key)? {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// The `uri` credential, when present.
    pub fn uri(&self) -> Option<String> {
        self.credential_string("uri")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_services() -> VcapServices {
        serde_json::from_value(json!({
            "postgres": [{
                "name": "my-db",
                "label": "postgres",
                "plan": "shared",
                "tags": ["relational", "sql"],
                "credentials": {"uri": "postgres://user:pw@db.example.com:5432/app"}
            }],
            "user-provided": [{
                "name": "my-cache",
                "label": "user-provided",
                "credentials": {"host": "cache.example.com", "port": 6379, "password": "s3cret"}
            }]
        }))
        .unwrap()
    }

    #[test]
    fn with_name_finds_service_across_labels() {
        let services = sample_services();

        assert_eq!(services.with_name("my-cache").unwrap().label, "user-provided");
        assert!(services.with_name("unknown").is_none());
    }

    #[test]
    fn with_label_returns_all_bound_instances() {
        let services = sample_services();

        assert_eq!(services.with_label("postgres").len(), 1);
        assert!(services.with_label("rabbitmq").is_empty());
    }

    #[test]
    fn with_tag_matches_service_tags() {
        let services = sample_services();

        assert_eq!(services.with_tag("sql").unwrap().name, "my-db");
        assert!(services.with_tag("queue").is_none());
    }

    #[test]
    fn credential_string_coerces_numbers() {
        let services = sample_services();
        let cache = services.with_name("my-cache").unwrap();

        assert_eq!(cache.credential_string("port").unwrap(), "6379");
        assert_eq!(cache.credential_string("host").unwrap(), "cache.example.com");
        assert!(cache.credential_string("missing").is_none());
    }

    #[test]
    fn credential_u64_accepts_numbers_and_strings() {
        let service: Service = serde_json::from_value(json!({
            "name": "svc",
            "credentials": {"as_number": 5432, "as_string": "5432", "not_a_number": "x"}
        }))
        .unwrap();

        assert_eq!(service.credential_u64("as_number"), Some(5432));
        assert_eq!(service.credential_u64("as_string"), Some(5432));
        assert!(service.credential_u64("not_a_number").is_none());
    }

    #[test]
    fn absent_vcap_services_yields_empty_registry() {
        let services = VcapServices::default();
        assert!(services.with_name("anything").is_none());
        assert!(services.with_label("anything").is_empty());
    }
}
