//! Redis cache client bound via `VCAP_SERVICES`.
//!
//! Connection credentials (`host`, `port`, optional `password`) come from the
//! bound service. Pool tuning lives next to them, nested under the service
//! credentials as in
//! `VCAP_SERVICES.user-provided.0.credentials.redis.{max_idle,max_active,idle_timeout,wait}`.
//!
//! Structured values are stored as JSON strings and decoded on read.

use crate::config::{Service, Settings};
use anyhow::Context;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

#[derive(Clone, Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub max_idle: u32,
    pub max_active: u32,
    pub idle_timeout: String,
    pub wait: bool,
}

impl RedisSettings {
    /// Reads the tuning block nested under the bound service's credentials.
    pub fn from_settings(settings: &Settings) -> Self {
        let value = settings.get_env(
            "VCAP_SERVICES",
            &["user-provided", "0", "credentials", "redis"],
        );
        serde_json::from_value(value).unwrap_or_default()
    }
}

/// A Redis client with JSON value encoding on top of a managed connection.
#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
}

impl RedisClient {
    /// Connects to the Redis service bound under `name` (or found by the
    /// `redis` label/tag when no name is given).
    pub async fn from_settings(
        settings: &Settings,
        name: Option<&str>,
    ) -> anyhow::Result<RedisClient> {
        let service = find_service(settings, name)
            .with_context(|| format!("No redis service bound for: {:?}", name))?;

        let tuning = RedisSettings::from_settings(settings);
        tracing::debug!("Redis tuning: {:?}", tuning);

        let client = redis::Client::open(connection_info(&service)?)
            .context("Failed to create redis client")?;

        let mut config = ConnectionManagerConfig::new();
        if !tuning.idle_timeout.is_empty() {
            let timeout = parse_duration(&tuning.idle_timeout)
                .with_context(|| format!("Invalid idle_timeout: '{}'", tuning.idle_timeout))?;
            config = config
                .set_connection_timeout(timeout)
                .set_response_timeout(timeout);
        }

        let manager = ConnectionManager::new_with_config(client, config)
            .await
            .context("Failed to create redis connection")?;

        Ok(RedisClient { manager })
    }

    /// Stores a value under `key`, JSON-encoded.
    pub async fn set<V: Serialize>(&self, key: &str, value: &V) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        let data = serde_json::to_string(value)?;
        conn.set::<_, _, ()>(key, data)
            .await
            .with_context(|| format!("Failed to set '{}'", key))
    }

    /// Stores a value under `key` with an expiration period in seconds.
    pub async fn set_with_expire<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        expire_secs: u64,
    ) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        let data = serde_json::to_string(value)?;
        conn.set_ex::<_, _, ()>(key, data, expire_secs)
            .await
            .with_context(|| format!("Failed to set '{}' with expiry", key))
    }

    /// Reads and decodes the value stored under `key`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn
            .get(key)
            .await
            .with_context(|| format!("Failed to get '{}'", key))?;

        match raw {
            Some(data) => Ok(Some(decode(&data)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key)
            .await
            .with_context(|| format!("Failed to delete '{}'", key))
    }

    /// Lists keys matching the given patterns ("*" when none are given).
    pub async fn keys(&self, matching: &[&str]) -> anyhow::Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let patterns: Vec<&str> = if matching.is_empty() {
            vec!["*"]
        } else {
            matching.to_vec()
        };

        let mut keys = Vec::new();
        for pattern in patterns {
            let mut found: Vec<String> = conn
                .keys(pattern)
                .await
                .with_context(|| format!("Failed to list keys for '{}'", pattern))?;
            keys.append(&mut found);
        }
        Ok(keys)
    }

    pub async fn keys_with_prefix(&self, prefixes: &[&str]) -> anyhow::Result<Vec<String>> {
        let patterns: Vec<String> = prefixes.iter().map(|p| format!("{}*", p)).collect();
        let patterns: Vec<&str> = patterns.iter().map(String::as_str).collect();
        self.keys(&patterns).await
    }

    /// Reads the raw values stored under the given keys.
    pub async fn mget(&self, keys: &[&str]) -> anyhow::Result<Vec<Option<String>>> {
        if keys.is_empty() {
            anyhow::bail!("No keys given");
        }

        let mut conn = self.manager.clone();
        conn.mget(keys).await.context("Failed to mget")
    }

    /// Sets a hash field. Returns true if the field was newly created.
    pub async fn hset<V: Serialize>(
        &self,
        hash: &str,
        field: &str,
        value: &V,
    ) -> anyhow::Result<bool> {
        let mut conn = self.manager.clone();
        let data = serde_json::to_string(value)?;
        let created: i64 = conn
            .hset(hash, field, data)
            .await
            .with_context(|| format!("Failed to hset '{}.{}'", hash, field))?;
        Ok(created == 1)
    }

    pub async fn hget<T: DeserializeOwned>(
        &self,
        hash: &str,
        field: &str,
    ) -> anyhow::Result<Option<T>> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn
            .hget(hash, field)
            .await
            .with_context(|| format!("Failed to hget '{}.{}'", hash, field))?;

        match raw {
            Some(data) => Ok(Some(decode(&data)?)),
            None => Ok(None),
        }
    }

    pub async fn hdel(&self, hash: &str, fields: &[&str]) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        conn.hdel::<_, _, ()>(hash, fields.to_vec())
            .await
            .with_context(|| format!("Failed to hdel from '{}'", hash))
    }

    pub async fn hkeys(&self, hash: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.manager.clone();
        conn.hkeys(hash)
            .await
            .with_context(|| format!("Failed to hkeys '{}'", hash))
    }

    pub async fn hvals(&self, hash: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.manager.clone();
        conn.hvals(hash)
            .await
            .with_context(|| format!("Failed to hvals '{}'", hash))
    }

    /// Returns server information (the INFO command).
    pub async fn info(&self) -> anyhow::Result<String> {
        let mut conn = self.manager.clone();
        redis::cmd("INFO")
            .query_async(&mut conn)
            .await
            .context("Failed to read server info")
    }

    /// Generic command escape hatch.
    pub async fn command(&self, cmd: &str, args: &[&str]) -> anyhow::Result<redis::Value> {
        let mut conn = self.manager.clone();
        let mut command = redis::cmd(cmd);
        for arg in args {
            command.arg(arg);
        }
        command
            .query_async(&mut conn)
            .await
            .with_context(|| format!("Redis command '{}' failed", cmd))
    }
}

fn find_service(settings: &Settings, name: Option<&str>) -> Option<Service> {
    if let Some(name) = name.filter(|name| !name.is_empty()) {
        return settings.services.with_name(name).cloned();
    }

    settings
        .services
        .with_label("redis")
        .first()
        .cloned()
        .or_else(|| settings.services.with_tag("redis").cloned())
        .or_else(|| {
            settings
                .services
                .with_label("user-provided")
                .iter()
                .find(|service| service.credentials.contains_key("host"))
                .cloned()
        })
}

fn connection_info(service: &Service) -> anyhow::Result<ConnectionInfo> {
    let host = service
        .credential_string("host")
        .context("Redis service has no 'host' credential")?;
    let port = service
        .credential_u64("port")
        .context("Redis service has no 'port' credential")? as u16;
    let password = service.credential_string("password");

    if password.is_none() {
        tracing::warn!("No password set for redis. Fine for development, bad in production");
    }

    Ok(ConnectionInfo {
        addr: ConnectionAddr::Tcp(host, port),
        redis: RedisConnectionInfo {
            password,
            ..RedisConnectionInfo::default()
        },
    })
}

fn decode<T: DeserializeOwned>(data: &str) -> anyhow::Result<T> {
    serde_json::from_str(data).context("Failed to decode redis value")
}

/// Parses duration strings in the style the platform settings use: a bare
/// number of seconds or a number with a `ms`, `s`, `m` or `h` suffix.
fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();

    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let (number, unit) = raw.split_at(raw.find(|c: char| c.is_ascii_alphabetic())?);
    let number = number.parse::<u64>().ok()?;

    match unit {
        "ms" => Some(Duration::from_millis(number)),
        "s" => Some(Duration::from_secs(number)),
        "m" => Some(Duration::from_secs(number * 60)),
        "h" => Some(Duration::from_secs(number * 3600)),
        _ => None,
    }
}
