//! Schema metadata used to name tables and indexes

use crate::{Error, Result};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

/// Database state as reported by TiDB; `0` means the database is not public yet.
const STATE_NONE: u8 = 0;

/// Etcd key under which TiDB publishes its global schema version.
pub const SCHEMA_VERSION_KEY: &str = "/tidb/ddl/global_schema_version";

/// A CIStr-style name (`{"O": original, "L": lowercase}`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Name {
    #[serde(rename = "O")]
    pub original: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbInfo {
    pub id: i64,
    pub db_name: Name,
    #[serde(default)]
    pub state: u8,
}

impl DbInfo {
    pub fn is_public(&self) -> bool {
        self.state != STATE_NONE
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexInfo {
    pub id: i64,
    pub idx_name: Name,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartitionDefinition {
    pub id: i64,
    pub name: Name,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartitionInfo {
    #[serde(default)]
    pub definitions: Vec<PartitionDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableInfo {
    pub id: i64,
    pub name: Name,
    #[serde(default, rename = "index_info")]
    pub indices: Vec<IndexInfo>,
    #[serde(default)]
    pub partition: Option<PartitionInfo>,
}

/// Source of schema metadata.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// Global schema version. Unchanged versions mean unchanged schemas;
    /// `None` means the provider cannot tell and every refresh reloads.
    async fn schema_version(&self) -> Result<Option<i64>> {
        Ok(None)
    }

    async fn databases(&self) -> Result<Vec<DbInfo>>;

    async fn tables(&self, db: &str) -> Result<Vec<TableInfo>>;
}

#[derive(Debug, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    #[serde(default)]
    value: String,
}

/// Reads schema metadata from the TiDB status API.
///
/// With an etcd endpoint configured (PD serves the etcd JSON gateway), the
/// global schema version is read from [`SCHEMA_VERSION_KEY`].
pub struct HttpSchemaProvider {
    client: reqwest::Client,
    status_url: Url,
    etcd_url: Option<Url>,
}

impl HttpSchemaProvider {
    pub fn new(status_addr: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            status_url: endpoint_url(status_addr)?,
            etcd_url: None,
        })
    }

    /// Read the schema version through the etcd gateway at `etcd_addr`.
    pub fn with_etcd(mut self, etcd_addr: &str) -> Result<Self> {
        self.etcd_url = Some(endpoint_url(etcd_addr)?);
        Ok(self)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = join_segments(&self.status_url, segments)?;
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(Error::Source(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::Serialization(format!("TiDB schema API unmarshal failed: {}", e)))
    }
}

#[async_trait]
impl SchemaProvider for HttpSchemaProvider {
    async fn schema_version(&self) -> Result<Option<i64>> {
        let Some(etcd_url) = &self.etcd_url else {
            return Ok(None);
        };
        let url = join_segments(etcd_url, &["v3", "kv", "range"])?;
        let request = serde_json::json!({ "key": BASE64.encode(SCHEMA_VERSION_KEY) });
        let response = self.client.post(url.clone()).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(Error::Source(format!(
                "POST {} returned {}",
                url,
                response.status()
            )));
        }
        let body = response.bytes().await?;
        let range: RangeResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::Serialization(format!("etcd range unmarshal failed: {}", e)))?;
        parse_schema_version(&range).map(Some)
    }

    async fn databases(&self) -> Result<Vec<DbInfo>> {
        self.get(&["schema"]).await
    }

    async fn tables(&self, db: &str) -> Result<Vec<TableInfo>> {
        self.get(&["schema", db]).await
    }
}

fn endpoint_url(addr: &str) -> Result<Url> {
    let addr = addr.trim_end_matches('/');
    let raw = if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    };
    Url::parse(&raw).map_err(|e| Error::Config(format!("invalid endpoint '{}': {}", addr, e)))
}

/// Append percent-encoded path segments to `base`.
fn join_segments(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| Error::Config(format!("endpoint '{}' cannot carry a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn parse_schema_version(range: &RangeResponse) -> Result<i64> {
    let [kv] = range.kvs.as_slice() else {
        return Err(Error::Source(format!(
            "expected one value at {}, found {}",
            SCHEMA_VERSION_KEY,
            range.kvs.len()
        )));
    };
    let raw = BASE64
        .decode(kv.value.as_bytes())
        .map_err(|e| Error::Serialization(format!("schema version is not base64: {}", e)))?;
    String::from_utf8_lossy(&raw)
        .trim()
        .parse::<i64>()
        .map_err(|e| Error::Serialization(format!("schema version is not an integer: {}", e)))
}
