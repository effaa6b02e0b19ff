//! Image storage backed by presigned operations from a media API.
//!
//! The media API signs each upload/download/delete for the signed-in user;
//! the client then performs the signed request directly against the object
//! store.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::auth::IdentityProvider;
use crate::models::{ImageData, ImageKey, TransferProgress};
use crate::util::{describe_http_failure, normalize_http_url};
use crate::{Error, Result};

use super::{ImageStore, ProgressCallback};

/// HTTP client for presigned media operations.
#[derive(Clone)]
pub struct PresignedImageStore {
    base_url: String,
    prefix: String,
    client: reqwest::Client,
    identity: Arc<dyn IdentityProvider>,
}

impl PresignedImageStore {
    /// Builds a store for an explicit media API base URL.
    ///
    /// Object keys are namespaced under `prefix` (e.g. `public/<key>`).
    pub fn new(
        base_url: impl AsRef<str>,
        prefix: impl AsRef<str>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self> {
        let base_url =
            normalize_http_url(base_url.as_ref(), "Storage base URL").map_err(Error::InvalidInput)?;
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url,
            prefix: prefix.as_ref().trim().trim_matches('/').to_string(),
            client,
            identity,
        })
    }

    /// Returns the base URL this store was configured with.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full object key for an image key.
    pub fn object_key(&self, key: &ImageKey) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }

    async fn request_presigned(
        &self,
        access_token: &str,
        route: &str,
        body: &serde_json::Value,
    ) -> Result<PresignedOperation> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, route))
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;
        parse_presign_response(response, "Signed URL request").await
    }

    async fn perform(
        &self,
        operation: PresignedOperation,
        body: Option<Vec<u8>>,
        label: &str,
    ) -> Result<reqwest::Response> {
        let method = parse_method(&operation.method)?;
        let mut request = self.client.request(method, &operation.url);
        for (name, value) in operation.headers {
            if name.eq_ignore_ascii_case("host") {
                continue;
            }
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Storage(format!(
                "{label} failed: {}",
                describe_http_failure(status, &body)
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ImageStore for PresignedImageStore {
    async fn upload(
        &self,
        key: &ImageKey,
        image: &ImageData,
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        let access_token = self.identity.access_token().await?;
        let object_key = self.object_key(key);
        let operation = self
            .request_presigned(
                &access_token,
                "/v1/media/presign/upload",
                &serde_json::json!({
                    "object_key": object_key,
                    "content_type": image.content_type_or_default(),
                }),
            )
            .await?;

        let total = image.len() as u64;
        report(progress.as_ref(), 0, Some(total));
        self.perform(operation, Some(image.bytes.clone()), "Upload")
            .await?;
        report(progress.as_ref(), total, Some(total));
        tracing::debug!(%object_key, bytes = total, "Uploaded image");
        Ok(())
    }

    async fn download(
        &self,
        key: &ImageKey,
        progress: Option<ProgressCallback>,
    ) -> Result<ImageData> {
        let access_token = self.identity.access_token().await?;
        let object_key = self.object_key(key);
        let url = format!(
            "{}/v1/media/presign/download?object_key={}",
            self.base_url,
            urlencoding::encode(&object_key)
        );

        let response = self
            .client
            .get(url)
            .bearer_auth(&access_token)
            .header("Accept", "application/json")
            .send()
            .await?;
        let operation = parse_presign_response(response, "Download URL request").await?;

        let mut response = self.perform(operation, None, "Download").await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let total = response.content_length();

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            bytes.extend_from_slice(&chunk);
            report(progress.as_ref(), bytes.len() as u64, total);
        }
        tracing::debug!(%object_key, bytes = bytes.len(), "Downloaded image");

        ImageData::new(bytes, content_type)
            .map_err(|_| Error::Storage(format!("Image '{object_key}' is empty")))
    }

    async fn delete(&self, key: &ImageKey) -> Result<()> {
        let access_token = self.identity.access_token().await?;
        let object_key = self.object_key(key);
        let operation = self
            .request_presigned(
                &access_token,
                "/v1/media/presign/delete",
                &serde_json::json!({
                    "object_key": object_key,
                }),
            )
            .await?;

        self.perform(operation, None, "Delete").await?;
        tracing::debug!(%object_key, "Deleted image");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PresignResponse {
    operation: PresignedOperation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PresignedOperation {
    method: String,
    url: String,
    #[serde(default)]
    headers: Vec<(String, String)>,
}

async fn parse_presign_response(
    response: reqwest::Response,
    label: &str,
) -> Result<PresignedOperation> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Storage(format!(
            "{label} failed: {}",
            describe_http_failure(status, &body)
        )));
    }
    let payload = response.json::<PresignResponse>().await?;
    Ok(payload.operation)
}

fn parse_method(raw: &str) -> Result<Method> {
    Method::from_bytes(raw.as_bytes())
        .map_err(|error| Error::Storage(format!("Unsupported HTTP method: {error}")))
}

fn report(progress: Option<&ProgressCallback>, transferred_bytes: u64, total_bytes: Option<u64>) {
    if let Some(callback) = progress {
        callback(TransferProgress {
            transferred_bytes,
            total_bytes,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeIdentity;

    use std::sync::Mutex;

    use serde_json::json;
    use wiremock::matchers::{body_bytes, body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> PresignedImageStore {
        PresignedImageStore::new(
            server.uri(),
            "public",
            Arc::new(FakeIdentity::signed_in("user-1")),
        )
        .unwrap()
    }

    fn key() -> ImageKey {
        "cat".parse().unwrap()
    }

    #[test]
    fn object_key_applies_prefix() {
        let with_prefix = PresignedImageStore::new(
            "https://media.example.com",
            "/public/",
            Arc::new(FakeIdentity::signed_out()),
        )
        .unwrap();
        assert_eq!(with_prefix.object_key(&key()), "public/cat");

        let bare = PresignedImageStore::new(
            "https://media.example.com",
            "",
            Arc::new(FakeIdentity::signed_out()),
        )
        .unwrap();
        assert_eq!(bare.object_key(&key()), "cat");
    }

    #[test]
    fn new_rejects_invalid_base_url() {
        assert!(PresignedImageStore::new("example.com", "public", Arc::new(FakeIdentity::signed_out())).is_err());
    }

    #[tokio::test]
    async fn upload_performs_signed_put_and_reports_progress() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/media/presign/upload"))
            .and(body_partial_json(json!({ "object_key": "public/cat", "content_type": "image/png" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "operation": {
                    "method": "PUT",
                    "url": format!("{}/bucket/public/cat", server.uri()),
                    "headers": [["content-type", "image/png"], ["host", "ignored"]]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/bucket/public/cat"))
            .and(body_bytes(vec![1_u8, 2, 3]))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |progress| {
            sink.lock().unwrap().push(progress.transferred_bytes);
        });

        let image = ImageData::new(vec![1, 2, 3], Some("image/png".to_string())).unwrap();
        store(&server)
            .upload(&key(), &image, Some(callback))
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 3]);
    }

    #[tokio::test]
    async fn download_returns_bytes_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/media/presign/download"))
            .and(query_param("object_key", "public/cat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "operation": {
                    "method": "GET",
                    "url": format!("{}/bucket/public/cat", server.uri()),
                    "headers": []
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bucket/public/cat"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![9_u8; 16], "image/jpeg"))
            .mount(&server)
            .await;

        let last = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&last);
        let callback: ProgressCallback = Arc::new(move |progress| {
            *sink.lock().unwrap() = Some(progress);
        });

        let image = store(&server).download(&key(), Some(callback)).await.unwrap();
        assert_eq!(image.bytes, vec![9_u8; 16]);
        assert_eq!(image.content_type.as_deref(), Some("image/jpeg"));
        let last = last.lock().unwrap().unwrap();
        assert_eq!(last.transferred_bytes, 16);
        assert_eq!(last.fraction(), Some(1.0));
    }

    #[tokio::test]
    async fn delete_surfaces_storage_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/media/presign/delete"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "message": "forbidden" })))
            .mount(&server)
            .await;

        let error = store(&server).delete(&key()).await.unwrap_err();
        assert_eq!(
            error.to_string(),
            "Storage error: Signed URL request failed: forbidden (403)"
        );
    }
}
