//! S3-compatible blob store bound via `VCAP_SERVICES`.
//!
//! Optional env JSON value:
//! `cfboot_blobstore={"name": "my-blobstore"}`

use crate::config::Settings;
use anyhow::Context;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use serde::Deserialize;

const FALLBACK_LABEL: &str = "predix-blobstore";

// The SDK requires a region even though the endpoint overrides it.
const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct BlobstoreSettings {
    pub name: String,
}

/// An S3 client bound to the store's configured bucket.
#[derive(Clone, Debug)]
pub struct BlobStore {
    pub client: Client,
    pub bucket: String,
}

impl BlobStore {
    /// Builds the client from the bound service's credentials: static access
    /// keys, an endpoint override and path-style addressing.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<BlobStore> {
        let env: BlobstoreSettings = settings.parse("cfboot_blobstore")?;
        tracing::debug!("Blobstore env: {:?}", env);

        let service = settings
            .get_service(&env.name, FALLBACK_LABEL)
            .context("No blobstore service bound. Check VCAP_SERVICES")?;

        let access_key_id = service
            .credential_string("access_key_id")
            .context("Blobstore service has no 'access_key_id' credential")?;
        let secret_access_key = service
            .credential_string("secret_access_key")
            .context("Blobstore service has no 'secret_access_key' credential")?;
        let host = service
            .credential_string("host")
            .context("Blobstore service has no 'host' credential")?;
        let bucket = service
            .credential_string("bucket_name")
            .context("Blobstore service has no 'bucket_name' credential")?;

        tracing::info!("Setting up blob store for bucket '{}'....", bucket);

        let credentials =
            Credentials::new(access_key_id, secret_access_key, None, None, "vcap-services");
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(DEFAULT_REGION))
            .endpoint_url(endpoint_url(&host))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(BlobStore {
            client: Client::from_conf(config),
            bucket,
        })
    }

    #[tracing::instrument(skip(self), err(Display))]
    pub async fn bucket_exists(&self) -> anyhow::Result<bool> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(err)
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false) =>
            {
                Ok(false)
            }
            Err(e) => Err(e).context(format!("Cannot access bucket '{}'", self.bucket)),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, data), err(Display))]
    pub async fn put_object(&self, key: &str, data: Vec<u8>) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .with_context(|| format!("Failed to store '{}' in bucket '{}'", key, self.bucket))?;

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    pub async fn get_object(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to read '{}' from bucket '{}'", key, self.bucket))?;

        let data = response
            .body
            .collect()
            .await
            .with_context(|| format!("Failed to buffer '{}' from bucket '{}'", key, self.bucket))?;

        Ok(data.into_bytes().to_vec())
    }

    #[tracing::instrument(level = "debug", skip(self), ret(Debug), err(Display))]
    pub async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        let _ = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| {
                format!("Failed to delete '{}' from bucket '{}'", key, self.bucket)
            })?;

        Ok(())
    }
}

// Brokers usually report the endpoint as a bare hostname. The original
// platform stores were plain HTTP behind the router.
fn endpoint_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_owned()
    } else {
        format!("http://{}", host)
    }
}
