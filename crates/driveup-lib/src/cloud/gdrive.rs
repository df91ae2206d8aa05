//! Google Drive v3 storage backend.
//!
//! Quota comes from `about.storageQuota`, listings from `files.list` with a
//! `q` filter, and uploads use the resumable protocol: a metadata POST that
//! returns a session URL, then one streamed PUT of the content.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use crate::auth::BearerSource;
use crate::cloud::{
    FileFilter, FileOrder, NewFile, QuotaReport, RemoteFileRecord, StorageBackend, UploadBody,
};
use crate::errors::{DriveUpError, Result};
use crate::http_client::HttpClient;

// ---------------------------------------------------------------------------
// Wire models
// ---------------------------------------------------------------------------

/// Drive encodes int64 fields as JSON strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    trashed_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageQuota {
    #[serde(default)]
    limit: Option<String>,
    #[serde(default)]
    usage: Option<String>,
    #[serde(default)]
    usage_in_drive_trash: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct About {
    storage_quota: StorageQuota,
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parents: Option<Vec<&'a str>>,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

fn parse_int64(field: &str, value: Option<&str>) -> Result<u64> {
    match value {
        None => Ok(0),
        Some(v) => v
            .parse()
            .map_err(|_| DriveUpError::remote("quota", None, format!("bad {field} value '{v}'"))),
    }
}

impl From<DriveFile> for RemoteFileRecord {
    fn from(f: DriveFile) -> Self {
        RemoteFileRecord {
            id: f.id,
            name: f.name,
            modified_time: f.modified_time,
            size: f.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            trashed_time: f.trashed_time,
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,size,modifiedTime,trashedTime)";
const LIST_PAGE_SIZE: &str = "1000";
const DEFAULT_MIME: &str = "application/octet-stream";
/// Purging a trashed folder also purges its trashed children.
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Base URLs of the Drive API; overridable for tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveEndpoints {
    pub api_base: String,
    pub upload_base: String,
}

impl Default for DriveEndpoints {
    fn default() -> Self {
        Self {
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
        }
    }
}

impl DriveEndpoints {
    /// Both bases rooted at `base`, as served by a mock server.
    pub fn rooted_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            api_base: format!("{base}/drive/v3"),
            upload_base: format!("{base}/upload/drive/v3"),
        }
    }
}

/// Quote `value` for a Drive `q` expression.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn query_for(filter: &FileFilter) -> String {
    match filter {
        FileFilter::NamedIn { name, parent } => format!(
            "name = {} and {} in parents and trashed = false",
            quote(name),
            quote(parent.as_deref().unwrap_or("root"))
        ),
        FileFilter::Trashed => {
            format!("trashed = true and 'me' in owners and mimeType != '{FOLDER_MIME}'")
        }
    }
}

/// Turn a non-2xx response into `Remote`, preferring Drive's error message.
async fn check(resp: reqwest::Response, operation: &str) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(body);
    Err(DriveUpError::remote(operation, Some(status), message))
}

// ---------------------------------------------------------------------------
// DriveBackend
// ---------------------------------------------------------------------------

/// [`StorageBackend`] for one Google Drive account.
pub struct DriveBackend {
    http: HttpClient,
    auth: Arc<dyn BearerSource>,
    endpoints: DriveEndpoints,
}

impl DriveBackend {
    pub fn new(http: HttpClient, auth: Arc<dyn BearerSource>) -> Self {
        Self::with_endpoints(http, auth, DriveEndpoints::default())
    }

    pub fn with_endpoints(
        http: HttpClient,
        auth: Arc<dyn BearerSource>,
        endpoints: DriveEndpoints,
    ) -> Self {
        Self {
            http,
            auth,
            endpoints,
        }
    }

    async fn list_page(
        &self,
        q: &str,
        order: FileOrder,
        page_token: Option<&str>,
    ) -> Result<DriveFileList> {
        let token = self.auth.bearer().await?;

        let mut params: Vec<(&str, &str)> = vec![
            ("q", q),
            ("fields", LIST_FIELDS),
            ("pageSize", LIST_PAGE_SIZE),
            ("spaces", "drive"),
        ];
        if order == FileOrder::OldestModified {
            params.push(("orderBy", "modifiedTime"));
        }
        if let Some(pt) = page_token {
            params.push(("pageToken", pt));
        }

        let resp = self
            .http
            .client()
            .get(format!("{}/files", self.endpoints.api_base))
            .bearer_auth(&token)
            .query(&params)
            .send()
            .await?;
        let resp = check(resp, "list").await?;
        Ok(resp.json::<DriveFileList>().await?)
    }
}

#[async_trait]
impl StorageBackend for DriveBackend {
    fn name(&self) -> &str {
        "gdrive"
    }

    async fn create_file(&self, file: &NewFile, body: UploadBody) -> Result<String> {
        let token = self.auth.bearer().await?;
        let client = self.http.client();

        // Step 1: open a resumable session with the metadata.
        let metadata = CreateRequest {
            name: &file.name,
            parents: file.parent.as_deref().map(|p| vec![p]),
        };
        let resp = client
            .post(format!("{}/files", self.endpoints.upload_base))
            .bearer_auth(&token)
            .query(&[("uploadType", "resumable"), ("fields", "id")])
            .header("X-Upload-Content-Type", DEFAULT_MIME)
            .header("X-Upload-Content-Length", file.size)
            .json(&metadata)
            .send()
            .await?;
        let resp = check(resp, "create").await?;
        let session = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                DriveUpError::remote("create", None, "resumable session has no Location header")
            })?;
        tracing::debug!(file = %file.name, "Resumable upload session opened");

        // Step 2: stream the content into the session.
        let resp = self
            .http
            .transfer_client()
            .put(&session)
            .bearer_auth(&token)
            .header(CONTENT_TYPE, DEFAULT_MIME)
            .header(CONTENT_LENGTH, file.size)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(body)))
            .send()
            .await?;
        let resp = check(resp, "upload").await?;
        let created: CreatedFile = resp.json().await?;
        Ok(created.id)
    }

    async fn list_files(
        &self,
        filter: &FileFilter,
        order: FileOrder,
    ) -> Result<Vec<RemoteFileRecord>> {
        let q = query_for(filter);
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = match self.list_page(&q, order, page_token.as_deref()).await {
                Ok(page) => page,
                Err(e) if e.is_not_found() => {
                    tracing::debug!(query = %q, "Listing returned not found");
                    break;
                }
                Err(e) => return Err(e),
            };
            records.extend(page.files.into_iter().map(RemoteFileRecord::from));
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(records)
    }

    async fn delete_file(&self, id: &str) -> Result<()> {
        let token = self.auth.bearer().await?;
        let resp = self
            .http
            .client()
            .delete(format!("{}/files/{id}", self.endpoints.api_base))
            .bearer_auth(&token)
            .send()
            .await?;
        check(resp, "delete").await?;
        Ok(())
    }

    async fn get_quota(&self) -> Result<QuotaReport> {
        let token = self.auth.bearer().await?;
        let resp = self
            .http
            .client()
            .get(format!("{}/about", self.endpoints.api_base))
            .bearer_auth(&token)
            .query(&[("fields", "storageQuota")])
            .send()
            .await?;
        let about: About = check(resp, "quota").await?.json().await?;
        let quota = about.storage_quota;

        let total = match quota.limit.as_deref() {
            None => u64::MAX,
            limit => parse_int64("limit", limit)?,
        };
        Ok(QuotaReport {
            total,
            used: parse_int64("usage", quota.usage.as_deref())?,
            used_in_trash: parse_int64("usageInDriveTrash", quota.usage_in_drive_trash.as_deref())?,
        })
    }

    fn location_url(&self, folder: Option<&str>) -> String {
        match folder {
            Some(id) => format!("https://drive.google.com/drive/folders/{id}"),
            None => "https://drive.google.com/drive/my-drive".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticBearer;
    use crate::config::HttpSettings;
    use wiremock::matchers::{body_json, body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> DriveBackend {
        DriveBackend::with_endpoints(
            HttpClient::from_defaults().unwrap(),
            Arc::new(StaticBearer("test-token".into())),
            DriveEndpoints::rooted_at(&server.uri()),
        )
    }

    #[test]
    fn test_query_escapes_quotes() {
        let q = query_for(&FileFilter::NamedIn {
            name: "bob's report.txt".into(),
            parent: None,
        });
        assert_eq!(
            q,
            r"name = 'bob\'s report.txt' and 'root' in parents and trashed = false"
        );
        let q = query_for(&FileFilter::NamedIn {
            name: "a.txt".into(),
            parent: Some("folder123".into()),
        });
        assert!(q.contains("'folder123' in parents"));
        assert_eq!(
            query_for(&FileFilter::Trashed),
            "trashed = true and 'me' in owners and mimeType != 'application/vnd.google-apps.folder'"
        );
    }

    #[tokio::test]
    async fn test_quota_parses_string_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/about"))
            .and(query_param("fields", "storageQuota"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "storageQuota": {
                    "limit": "16106127360",
                    "usage": "1073741824",
                    "usageInDrive": "1000",
                    "usageInDriveTrash": "2048"
                }
            })))
            .mount(&server)
            .await;

        let quota = backend(&server).get_quota().await.unwrap();
        assert_eq!(quota.total, 16_106_127_360);
        assert_eq!(quota.used, 1_073_741_824);
        assert_eq!(quota.used_in_trash, 2048);
    }

    #[tokio::test]
    async fn test_quota_without_limit_is_unlimited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/about"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "storageQuota": { "usage": "10" }
            })))
            .mount(&server)
            .await;

        let quota = backend(&server).get_quota().await.unwrap();
        assert_eq!(quota.total, u64::MAX);
        assert_eq!(quota.used, 10);
    }

    #[tokio::test]
    async fn test_list_follows_pages_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [{"id": "c", "name": "r.txt", "size": "30",
                           "modifiedTime": "2024-01-03T00:00:00Z"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param(
                "q",
                "name = 'r.txt' and 'root' in parents and trashed = false",
            ))
            .and(query_param("orderBy", "modifiedTime"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "nextPageToken": "p2",
                "files": [
                    {"id": "a", "name": "r.txt", "size": "10", "modifiedTime": "2024-01-01T00:00:00Z"},
                    {"id": "b", "name": "r.txt", "modifiedTime": "2024-01-02T00:00:00Z"}
                ]
            })))
            .mount(&server)
            .await;

        let files = backend(&server)
            .list_files(
                &FileFilter::NamedIn {
                    name: "r.txt".into(),
                    parent: None,
                },
                FileOrder::OldestModified,
            )
            .await
            .unwrap();
        let ids: Vec<_> = files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(files[0].size, 10);
        assert_eq!(files[1].size, 0);
        assert!(files[0].modified_time.is_some());
    }

    #[tokio::test]
    async fn test_list_not_found_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": {"code": 404, "message": "File not found: folder123."}
            })))
            .mount(&server)
            .await;

        let files = backend(&server)
            .list_files(&FileFilter::Trashed, FileOrder::Unordered)
            .await
            .unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_list_server_error_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": {"code": 500, "message": "Backend Error"}
            })))
            .mount(&server)
            .await;

        let err = backend(&server)
            .list_files(&FileFilter::Trashed, FileOrder::Unordered)
            .await
            .unwrap_err();
        match err {
            DriveUpError::Remote { operation, status, message } => {
                assert_eq!(operation, "list");
                assert_eq!(status, Some(500));
                assert_eq!(message, "Backend Error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_is_permanent_delete() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/drive/v3/files/abc"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        backend(&server).delete_file("abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_resumable_upload() {
        let server = MockServer::start().await;
        let session = format!("{}/upload-session/xyz", server.uri());
        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .and(query_param("uploadType", "resumable"))
            .and(header("X-Upload-Content-Length", "11"))
            .and(body_json(serde_json::json!({"name": "report.txt", "parents": ["folder123"]})))
            .respond_with(ResponseTemplate::new(200).insert_header("Location", session.as_str()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/upload-session/xyz"))
            .and(body_string("hello drive"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "new-file-id"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let file = NewFile {
            name: "report.txt".into(),
            parent: Some("folder123".into()),
            size: 11,
        };
        let body: UploadBody = Box::pin(std::io::Cursor::new(b"hello drive".to_vec()));
        let id = backend(&server).create_file(&file, body).await.unwrap();
        assert_eq!(id, "new-file-id");
    }

    #[tokio::test]
    async fn test_slow_upload_body_outlives_read_timeout() {
        use tokio::io::AsyncWriteExt;

        let server = MockServer::start().await;
        let session = format!("{}/upload-session/slow", server.uri());
        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).insert_header("Location", session.as_str()))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/upload-session/slow"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "slow-id"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let http = HttpClient::new(&HttpSettings {
            connect_timeout_secs: 5,
            read_timeout_secs: 1,
            pool_idle_timeout_secs: 90,
        })
        .unwrap();
        let backend = DriveBackend::with_endpoints(
            http,
            Arc::new(StaticBearer("test-token".into())),
            DriveEndpoints::rooted_at(&server.uri()),
        );

        // 60 bytes trickled over about 1.8 s; the stream never stalls long.
        let (mut writer, reader) = tokio::io::duplex(64);
        let feeder = tokio::spawn(async move {
            for _ in 0..6 {
                writer.write_all(&[b'x'; 10]).await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            }
        });

        let file = NewFile {
            name: "big.bin".into(),
            parent: None,
            size: 60,
        };
        let started = std::time::Instant::now();
        let id = backend.create_file(&file, Box::pin(reader)).await.unwrap();
        assert_eq!(id, "slow-id");
        assert!(started.elapsed() > std::time::Duration::from_secs(1));
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_without_session_url_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let file = NewFile {
            name: "root.txt".into(),
            parent: None,
            size: 0,
        };
        let body: UploadBody = Box::pin(std::io::Cursor::new(Vec::new()));
        let err = backend(&server).create_file(&file, body).await.unwrap_err();
        assert!(matches!(err, DriveUpError::Remote { ref operation, .. } if operation == "create"));
    }

    #[test]
    fn test_location_urls() {
        let backend = DriveBackend::new(
            HttpClient::from_defaults().unwrap(),
            Arc::new(StaticBearer(String::new())),
        );
        assert_eq!(
            backend.location_url(Some("abc")),
            "https://drive.google.com/drive/folders/abc"
        );
        assert_eq!(backend.location_url(None), "https://drive.google.com/drive/my-drive");
    }
}
