//! Object storage client for a Supabase-compatible storage REST API.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `STORAGE_URL`: Base URL of the storage service (default: http://localhost:54321)
//! - `STORAGE_SERVICE_KEY`: Service-role key sent as bearer token and `apikey`
//! - `STORAGE_TIMEOUT_SECS`: Per-request timeout (default: 60)

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use verity_core::defaults::{STORAGE_TIMEOUT_SECS, STORAGE_URL};
use verity_core::{join_object_path, Error, ObjectStorage, Result};

/// Page size for prefix listings.
const LIST_PAGE_SIZE: usize = 1000;

/// Storage client configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub base_url: String,
    pub service_key: String,
    pub timeout_secs: u64,
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self> {
        let service_key = std::env::var("STORAGE_SERVICE_KEY")
            .map_err(|_| Error::Config("STORAGE_SERVICE_KEY is not set".to_string()))?;
        let base_url = std::env::var("STORAGE_URL").unwrap_or_else(|_| STORAGE_URL.to_string());
        let timeout_secs = std::env::var("STORAGE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(STORAGE_TIMEOUT_SECS);
        Ok(Self {
            base_url,
            service_key,
            timeout_secs,
        })
    }
}

/// HTTP object storage backend.
pub struct HttpObjectStorage {
    base_url: String,
    service_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ListRequest<'a> {
    prefix: &'a str,
    limit: usize,
    offset: usize,
}

#[derive(Deserialize)]
struct ListEntry {
    name: String,
    /// Folders are listed with a null id.
    id: Option<String>,
}

#[derive(Serialize)]
struct RemoveRequest<'a> {
    prefixes: &'a [String],
}

#[derive(Serialize)]
struct SignRequest {
    #[serde(rename = "expiresIn")]
    expires_in: u64,
}

#[derive(Deserialize)]
struct SignResponse {
    #[serde(rename = "signedURL", default)]
    signed_url: Option<String>,
}

impl HttpObjectStorage {
    pub fn new(config: StorageConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build storage client: {}", e)))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            service_key: config.service_key,
            client,
        })
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            bucket,
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
    }

    async fn check(response: reqwest::Response, op: &str, target: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Storage(format!(
            "{} {} returned {}: {}",
            op, target, status, body
        )))
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        let url = self.object_url(bucket, path);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| Error::Storage(format!("Download of {} failed: {}", path, e)))?;
        let response = Self::check(response, "Download", path).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Storage(format!("Download of {} interrupted: {}", path, e)))?;

        debug!(subsystem = "storage", op = "download", bucket, path, bytes = bytes.len(), "Object downloaded");
        Ok(bytes.to_vec())
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let url = self.object_url(bucket, path);
        let len = bytes.len();
        let response = self
            .authorized(self.client.post(&url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("Upload of {} failed: {}", path, e)))?;
        Self::check(response, "Upload", path).await?;

        debug!(subsystem = "storage", op = "upload", bucket, path, bytes = len, "Object uploaded");
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let url = format!("{}/storage/v1/object/list/{}", self.base_url, bucket);
        let folder = prefix.trim_end_matches('/');
        let mut paths = Vec::new();
        let mut offset = 0;

        loop {
            let request = ListRequest {
                prefix: folder,
                limit: LIST_PAGE_SIZE,
                offset,
            };
            let response = self
                .authorized(self.client.post(&url))
                .json(&request)
                .send()
                .await
                .map_err(|e| Error::Storage(format!("List of {} failed: {}", prefix, e)))?;
            let response = Self::check(response, "List", prefix).await?;
            let entries: Vec<ListEntry> = response
                .json()
                .await
                .map_err(|e| Error::Storage(format!("Failed to parse list response: {}", e)))?;

            let page_len = entries.len();
            paths.extend(
                entries
                    .into_iter()
                    .filter(|entry| entry.id.is_some())
                    .map(|entry| join_object_path(folder, &entry.name)),
            );

            if page_len < LIST_PAGE_SIZE {
                break;
            }
            offset += page_len;
        }

        Ok(paths)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let url = format!("{}/storage/v1/object/{}", self.base_url, bucket);
        let response = self
            .authorized(self.client.delete(&url))
            .json(&RemoveRequest { prefixes: paths })
            .send()
            .await
            .map_err(|e| Error::Storage(format!("Remove in {} failed: {}", bucket, e)))?;
        Self::check(response, "Remove", bucket).await?;

        debug!(subsystem = "storage", op = "remove", bucket, count = paths.len(), "Objects removed");
        Ok(())
    }

    async fn signed_url(&self, bucket: &str, path: &str, ttl: Duration) -> Result<String> {
        let url = format!(
            "{}/storage/v1/object/sign/{}/{}",
            self.base_url,
            bucket,
            path.trim_start_matches('/')
        );
        let response = self
            .authorized(self.client.post(&url))
            .json(&SignRequest {
                expires_in: ttl.as_secs(),
            })
            .send()
            .await
            .map_err(|e| Error::Storage(format!("Signing {} failed: {}", path, e)))?;
        let response = Self::check(response, "Sign", path).await?;
        let signed: SignResponse = response
            .json()
            .await
            .map_err(|e| Error::Storage(format!("Failed to parse sign response: {}", e)))?;

        match signed.signed_url {
            Some(relative) if !relative.is_empty() => {
                if relative.starts_with("http://") || relative.starts_with("https://") {
                    Ok(relative)
                } else {
                    Ok(format!("{}/storage/v1{}", self.base_url, relative))
                }
            }
            _ => Err(Error::Storage(format!("Signed URL not returned for {}", path))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn storage(server: &MockServer) -> HttpObjectStorage {
        HttpObjectStorage::new(StorageConfig {
            base_url: server.uri(),
            service_key: "service-key".to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_download_sends_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/object/user-uploads/u1/J1/manifest.json"))
            .and(header("authorization", "Bearer service-key"))
            .and(header("apikey", "service-key"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{\"images\":[]}".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let bytes = storage(&server)
            .download("user-uploads", "u1/J1/manifest.json")
            .await
            .unwrap();
        assert_eq!(bytes, b"{\"images\":[]}");
    }

    #[tokio::test]
    async fn test_download_not_found_is_storage_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Object not found"))
            .mount(&server)
            .await;

        let err = storage(&server)
            .download("user-uploads", "missing.png")
            .await
            .unwrap_err();
        match err {
            Error::Storage(msg) => assert!(msg.contains("404")),
            other => panic!("Expected Storage error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_is_upsert() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/user-uploads/u1/J1/report/ai_image_report.pdf"))
            .and(header("x-upsert", "true"))
            .and(header("content-type", "application/pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"Key": "k"})))
            .expect(1)
            .mount(&server)
            .await;

        storage(&server)
            .upload(
                "user-uploads",
                "u1/J1/report/ai_image_report.pdf",
                b"%PDF-1.4".to_vec(),
                "application/pdf",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_skips_folders_and_joins_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/list/user-uploads"))
            .and(body_json(serde_json::json!({
                "prefix": "u1/J1/input",
                "limit": 1000,
                "offset": 0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "a.png", "id": "1"},
                {"name": "nested", "id": null},
                {"name": "b.png", "id": "2"}
            ])))
            .mount(&server)
            .await;

        let paths = storage(&server)
            .list("user-uploads", "u1/J1/input/")
            .await
            .unwrap();
        assert_eq!(paths, vec!["u1/J1/input/a.png", "u1/J1/input/b.png"]);
    }

    #[tokio::test]
    async fn test_list_and_delete_removes_listed_paths() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/list/user-uploads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "a.png", "id": "1"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/storage/v1/object/user-uploads"))
            .and(body_json(serde_json::json!({"prefixes": ["u1/J1/input/a.png"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let removed = storage(&server)
            .list_and_delete("user-uploads", "u1/J1/input")
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_list_and_delete_empty_prefix_skips_remove() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/list/user-uploads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let removed = storage(&server)
            .list_and_delete("user-uploads", "u1/J1/input")
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn test_signed_url_is_absolute() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/sign/user-uploads/u1/report.pdf"))
            .and(body_json(serde_json::json!({"expiresIn": 86400})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "signedURL": "/object/sign/user-uploads/u1/report.pdf?token=abc"
            })))
            .mount(&server)
            .await;

        let url = storage(&server)
            .signed_url("user-uploads", "u1/report.pdf", Duration::from_secs(86_400))
            .await
            .unwrap();
        assert_eq!(
            url,
            format!(
                "{}/storage/v1/object/sign/user-uploads/u1/report.pdf?token=abc",
                server.uri()
            )
        );
    }

    #[tokio::test]
    async fn test_signed_url_missing_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = storage(&server)
            .signed_url("user-uploads", "u1/report.pdf", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Signed URL not returned"));
    }
}
