//! Remote object store client (Supabase storage REST dialect).
//!
//!   list        POST {base}/storage/v1/object/list/{bucket}
//!   public url  {base}/storage/v1/object/public/{bucket}/{name}
//!   upload      POST {base}/storage/v1/object/{bucket}/{name}
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clipfeed_proto::config::StoreConfig;
use clipfeed_proto::protocol::{is_audio_name, is_placeholder, Track};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list(&self) -> EngineResult<Vec<ObjectInfo>>;

    fn public_url(&self, name: &str) -> String;

    async fn upload(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> EngineResult<()>;
}

/// Name for a freshly recorded clip.
pub fn snippet_filename(unix_millis: i64, extension: &str) -> String {
    format!("snippet-{}.{}", unix_millis, extension.trim_start_matches('.'))
}

/// Turn a bucket listing into tracks, skipping placeholders and anything that
/// is not an audio clip.
pub fn tracks_from_listing(store: &dyn ObjectStore, listing: Vec<ObjectInfo>) -> Vec<Track> {
    listing
        .into_iter()
        .filter(|obj| !is_placeholder(&obj.name) && is_audio_name(&obj.name))
        .map(|obj| Track {
            url: store.public_url(&obj.name),
            display_name: obj.name,
            created_at: obj.created_at,
            liked: false,
        })
        .collect()
}

pub async fn fetch_tracks(store: &dyn ObjectStore) -> EngineResult<Vec<Track>> {
    let listing = store.list().await?;
    let total = listing.len();
    let tracks = tracks_from_listing(store, listing);
    info!("store: {} of {} objects are playable", tracks.len(), total);
    Ok(tracks)
}

pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    api_key: String,
    list_limit: u32,
}

impl HttpObjectStore {
    pub fn new(cfg: &StoreConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("clipfeed/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            bucket: cfg.bucket.clone(),
            api_key: cfg.api_key.clone(),
            list_limit: cfg.list_limit,
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            req
        } else {
            req.header("apikey", &self.api_key).bearer_auth(&self.api_key)
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn list(&self) -> EngineResult<Vec<ObjectInfo>> {
        let url = format!("{}/storage/v1/object/list/{}", self.base_url, self.bucket);
        debug!("store: listing {}", url);
        let body = json!({
            "prefix": "",
            "limit": self.list_limit,
            "offset": 0,
            "sortBy": { "column": "created_at", "order": "desc" },
        });
        let response = self
            .authorize(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| EngineError::Fetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EngineError::Fetch(format!("HTTP {}", response.status())));
        }
        response
            .json::<Vec<ObjectInfo>>()
            .await
            .map_err(|e| EngineError::Fetch(e.to_string()))
    }

    fn public_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, name
        )
    }

    async fn upload(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> EngineResult<()> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, name);
        let upload_error = |reason: String| EngineError::Upload {
            name: name.to_string(),
            reason,
        };
        info!("store: uploading {} ({} bytes)", name, bytes.len());
        let response = self
            .authorize(self.client.post(&url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| upload_error(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(upload_error(format!("HTTP {} {}", status, detail.trim())));
        }
        Ok(())
    }
}
