use async_trait::async_trait;
use reqwest::{header, redirect, Client, ClientBuilder, Response, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::domains::core::file_storage_service::WarehouseStore;
use crate::errors::{StoreError, StoreResult};

const WEBHDFS_PREFIX: &str = "/webhdfs/v1";

#[derive(Debug, Deserialize)]
struct BooleanResponse {
    boolean: bool,
}

#[derive(Debug, Deserialize)]
struct LocationResponse {
    #[serde(rename = "Location")]
    location: String,
}

#[derive(Debug, Deserialize)]
struct ListStatusResponse {
    #[serde(rename = "FileStatuses")]
    file_statuses: FileStatuses,
}

#[derive(Debug, Deserialize)]
struct FileStatuses {
    #[serde(rename = "FileStatus", default)]
    file_status: Vec<FileStatus>,
}

#[derive(Debug, Deserialize)]
struct FileStatus {
    #[serde(rename = "pathSuffix")]
    path_suffix: String,
}

#[derive(Debug, Deserialize)]
struct RemoteExceptionResponse {
    #[serde(rename = "RemoteException")]
    remote_exception: RemoteException,
}

#[derive(Debug, Deserialize)]
struct RemoteException {
    #[serde(default)]
    exception: String,
    #[serde(default)]
    message: String,
}

/// HDFS accessed through the NameNode's WebHDFS REST endpoint.
pub struct WebHdfsStore {
    client: Client,
    base_url: String,
    user: String,
}

impl WebHdfsStore {
    /// `base_url` is the NameNode HTTP address, e.g. `http://master1:9870`.
    pub fn new(base_url: &str, user: &str) -> StoreResult<Self> {
        let client = Self::client_builder().build()?;
        Ok(Self::with_client(client, base_url, user))
    }

    fn client_builder() -> ClientBuilder {
        // Redirects are followed by hand: CREATE must re-send the body to the DataNode
        Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(10))
            .redirect(redirect::Policy::none())
    }

    fn with_client(client: Client, base_url: &str, user: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            user: user.to_string(),
        }
    }

    /// Percent-encode each path segment; reject `.` and `..`.
    fn encode_path(path: &str) -> StoreResult<String> {
        let mut encoded = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(StoreError::InvalidPath(path.to_string()));
            }
            encoded.push('/');
            encoded.push_str(&urlencoding::encode(segment));
        }
        if encoded.is_empty() {
            encoded.push('/');
        }
        Ok(encoded)
    }

    fn op_url(&self, path: &str, op: &str, params: &[(&str, &str)]) -> StoreResult<String> {
        let mut url = format!(
            "{}{}{}?op={}&user.name={}",
            self.base_url,
            WEBHDFS_PREFIX,
            Self::encode_path(path)?,
            op,
            urlencoding::encode(&self.user)
        );
        for (key, value) in params {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        Ok(url)
    }

    /// Turn a non-success response into a `StoreError::Remote`.
    async fn check(response: Response, operation: &'static str, path: &str) -> StoreResult<Response> {
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to get error details".to_string());
        let message = match serde_json::from_str::<RemoteExceptionResponse>(&body) {
            Ok(parsed) => format!(
                "{}: {}",
                parsed.remote_exception.exception, parsed.remote_exception.message
            ),
            Err(_) => body,
        };

        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(format!("{} ({})", path, message)));
        }

        Err(StoreError::Remote {
            operation,
            path: path.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    /// Resolve the DataNode location a NameNode hands out for CREATE/OPEN.
    async fn redirect_location(response: Response, operation: &'static str, path: &str) -> StoreResult<String> {
        if response.status().is_redirection() {
            return response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| StoreError::Remote {
                    operation,
                    path: path.to_string(),
                    status: response.status().as_u16(),
                    message: "redirect without Location header".to_string(),
                });
        }

        // noredirect=true style answer
        let parsed: LocationResponse = response.json().await?;
        Ok(parsed.location)
    }

    async fn expect_true(response: Response, operation: &'static str, path: &str) -> StoreResult<()> {
        let parsed: BooleanResponse = response.json().await?;
        if parsed.boolean {
            Ok(())
        } else {
            Err(StoreError::Remote {
                operation,
                path: path.to_string(),
                status: 200,
                message: "operation returned false".to_string(),
            })
        }
    }
}

#[async_trait]
impl WarehouseStore for WebHdfsStore {
    async fn remove_recursive(&self, path: &str) -> StoreResult<()> {
        let url = self.op_url(path, "DELETE", &[("recursive", "true")])?;
        log::debug!("WebHDFS DELETE {}", path);

        let response = self.client.delete(&url).send().await?;
        let response = Self::check(response, "DELETE", path).await?;
        // false just means nothing was there
        let parsed: BooleanResponse = response.json().await?;
        if !parsed.boolean {
            log::debug!("WebHDFS DELETE {}: path was already absent", path);
        }
        Ok(())
    }

    async fn make_directory(&self, path: &str) -> StoreResult<()> {
        let url = self.op_url(path, "MKDIRS", &[])?;
        log::debug!("WebHDFS MKDIRS {}", path);

        let response = self.client.put(&url).send().await?;
        let response = Self::check(response, "MKDIRS", path).await?;
        Self::expect_true(response, "MKDIRS", path).await
    }

    async fn put_file(&self, local_path: &Path, remote_path: &str) -> StoreResult<()> {
        let url = self.op_url(remote_path, "CREATE", &[("overwrite", "true")])?;
        log::debug!("WebHDFS CREATE {} from {}", remote_path, local_path.display());

        let data = tokio::fs::read(local_path).await?;

        let response = self.client.put(&url).send().await?;
        let response = Self::check(response, "CREATE", remote_path).await?;
        let location = Self::redirect_location(response, "CREATE", remote_path).await?;

        let response = self
            .client
            .put(&location)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?;
        Self::check(response, "CREATE", remote_path).await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        let destination = Self::encode_path(to)?;
        // The destination is a query value; keep it as a plain absolute path
        let destination = urlencoding::decode(&destination)
            .map_err(|e| StoreError::InvalidPath(format!("{}: {}", to, e)))?
            .into_owned();
        let url = self.op_url(from, "RENAME", &[("destination", &destination)])?;
        log::debug!("WebHDFS RENAME {} -> {}", from, to);

        let response = self.client.put(&url).send().await?;
        let response = Self::check(response, "RENAME", from).await?;
        Self::expect_true(response, "RENAME", from).await
    }

    async fn list_directory(&self, path: &str) -> StoreResult<Vec<String>> {
        let url = self.op_url(path, "LISTSTATUS", &[])?;

        let response = self.client.get(&url).send().await?;
        let response = Self::check(response, "LISTSTATUS", path).await?;
        let parsed: ListStatusResponse = response.json().await?;

        let mut names: Vec<String> = parsed
            .file_statuses
            .file_status
            .into_iter()
            .map(|s| s.path_suffix)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn read_file(&self, path: &str) -> StoreResult<Vec<u8>> {
        let url = self.op_url(path, "OPEN", &[])?;

        let response = self.client.get(&url).send().await?;
        let response = Self::check(response, "OPEN", path).await?;
        let response = if response.status().is_redirection() {
            let location = Self::redirect_location(response, "OPEN", path).await?;
            let response = self.client.get(&location).send().await?;
            Self::check(response, "OPEN", path).await?
        } else {
            response
        };

        Ok(response.bytes().await?.to_vec())
    }

    fn describe(&self) -> String {
        format!("webhdfs:{} (user {})", self.base_url, self.user)
    }
}
