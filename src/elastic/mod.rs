//! Elasticsearch client configured from environment JSON.
//!
//! Optional env JSON value:
//! `cfboot_elastic={"urls": ["http://es1:9200", "http://es2:9200"], "healthcheck": {"enable": true}}`

use anyhow::Context;
use elasticsearch::Elasticsearch;
use elasticsearch::auth::Credentials;
use elasticsearch::http::transport::{
    MultiNodeConnectionPool, SingleNodeConnectionPool, Transport, TransportBuilder,
};
use elasticsearch::indices::{IndicesCreateParts, IndicesExistsParts};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use crate::config::Settings;

const DEFAULT_URL: &str = "http://localhost:9200";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ElasticSettings {
    pub urls: Vec<String>,
    pub user: String,
    pub password: String,
    pub healthcheck: HealthcheckSettings,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct HealthcheckSettings {
    pub enable: bool,
}

#[derive(Serialize)]
pub struct IndexDescription {
    pub settings: IndexSettings,
    pub mappings: Mapping,
}

#[derive(Serialize)]
pub struct IndexSettings {
    pub number_of_shards: u32,
    pub number_of_replicas: u32,
}

#[derive(Serialize)]
pub struct Mapping {
    pub properties: HashMap<String, FieldMapping>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldMapping {
    Text,
    Keyword,
    Integer,
    Float,
    Date,
    Boolean,
    Object {
        properties: HashMap<String, FieldMapping>,
    },
    Nested {
        properties: HashMap<String, FieldMapping>,
    },
}

pub struct ElasticClient {
    pub client: Elasticsearch,
}

impl ElasticClient {
    /// Builds the client from the `cfboot_elastic` env blob. With the
    /// healthcheck enabled, the cluster is pinged before the client is
    /// handed out.
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let env: ElasticSettings = settings.parse("cfboot_elastic")?;
        tracing::debug!("Elastic env: {:?}", env);

        let client = Elasticsearch::new(build_transport(&env)?);

        if env.healthcheck.enable {
            let response = client
                .ping()
                .send()
                .await
                .context("Elasticsearch healthcheck failed")?;
            if !response.status_code().is_success() {
                anyhow::bail!(
                    "Elasticsearch healthcheck returned {}",
                    response.status_code()
                );
            }
        }

        Ok(Self { client })
    }

    /// Creates the index with the given settings and mappings unless it
    /// already exists.
    pub async fn ensure_index_exists<F>(
        &self,
        index_name: &str,
        description_fn: F,
    ) -> anyhow::Result<()>
    where
        F: FnOnce() -> IndexDescription,
    {
        let exists_response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index_name]))
            .send()
            .await?;

        if exists_response.status_code().is_success() {
            return Ok(());
        }

        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(index_name))
            .body(description_fn())
            .send()
            .await?;

        if !response.status_code().is_success() {
            anyhow::bail!(
                "Failed to create index {}: {}",
                index_name,
                response.status_code()
            );
        }

        Ok(())
    }
}

fn build_transport(env: &ElasticSettings) -> anyhow::Result<Transport> {
    let mut urls: Vec<Url> = if env.urls.is_empty() {
        vec![Url::parse(DEFAULT_URL)?]
    } else {
        env.urls
            .iter()
            .map(|url| Url::parse(url).with_context(|| format!("Invalid node URL: '{}'", url)))
            .collect::<anyhow::Result<_>>()?
    };

    let transport = if urls.len() == 1 {
        let pool = SingleNodeConnectionPool::new(urls.remove(0));
        with_auth(TransportBuilder::new(pool), env).build()?
    } else {
        let pool = MultiNodeConnectionPool::round_robin(urls, None);
        with_auth(TransportBuilder::new(pool), env).build()?
    };

    Ok(transport)
}

fn with_auth(builder: TransportBuilder, env: &ElasticSettings) -> TransportBuilder {
    if env.user.is_empty() {
        builder
    } else {
        builder.auth(Credentials::Basic(env.user.clone(), env.password.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, VcapServices};
    use std::env;

    #[test]
    fn settings_parse_from_env_blob() {
        unsafe {
            env::set_var(
                "cfboot_elastic",
                r#"{"urls": ["http://es1:9200", "http://es2:9200"], "healthcheck": {"enable": true}}"#,
            );
        }

        let settings = Settings::from_parts(None, VcapServices::default());
        let env: ElasticSettings = settings.parse("cfboot_elastic").unwrap();
        assert_eq!(env.urls.len(), 2);
        assert!(env.healthcheck.enable);
        assert!(env.user.is_empty());
    }

    #[test]
    fn build_transport_defaults_to_localhost() {
        assert!(build_transport(&ElasticSettings::default()).is_ok());
    }

    #[test]
    fn build_transport_accepts_multiple_nodes() {
        let env = ElasticSettings {
            urls: vec![
                "http://es1:9200".to_owned(),
                "http://es2:9200".to_owned(),
            ],
            ..ElasticSettings::default()
        };

        assert!(build_transport(&env).is_ok());
    }

    #[test]
    fn build_transport_rejects_invalid_urls() {
        let env = ElasticSettings {
            urls: vec!["not a url".to_owned()],
            ..ElasticSettings::default()
        };

        assert!(build_transport(&env).is_err());
    }

    #[test]
    fn field_mappings_serialize_with_type_tags() {
        let mapping = Mapping {
            properties: HashMap::from([("title".to_owned(), FieldMapping::Text)]),
        };

        let value = serde_json::to_value(&mapping).unwrap();
        assert_eq!(value["properties"]["title"]["type"], "text");
    }

    #[tokio::test]
    #[ignore]
    async fn healthcheck_against_live_cluster() {
        unsafe {
            env::set_var(
                "cfboot_elastic",
                r#"{"healthcheck": {"enable": true}}"#,
            );
        }

        let settings = Settings::from_parts(None, VcapServices::default());
        assert!(ElasticClient::from_settings(&settings).await.is_ok());
    }
}
