//! Drive-like storage backend.
//!
//! Talks to a Drive v3-style REST API over `reqwest` with an OAuth bearer
//! token obtained from a refresh-token grant. Folders are resolved or
//! created level by level and cached for the run. Placing a file whose
//! name already exists in its folder updates that file in place, so
//! re-placing after a prior success never duplicates.

use super::{PlacedLocation, ProgressFn, StorageBackend, TransferError};
use crate::config::DriveConfig;
use crate::recording::DestinationSpec;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::{Mutex, RwLock};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

const DEFAULT_API_HOST: &str = "https://www.googleapis.com";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

pub struct DriveBackend {
    client: Client,
    api_host: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    root_folder: String,
    token: RwLock<Option<String>>,
    // full folder path -> folder id, valid for the lifetime of the run
    folder_ids: Mutex<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFileMeta {
    #[serde(default)]
    size: Option<String>,
}

impl DriveBackend {
    pub fn new(config: &DriveConfig) -> Self {
        let api_host = if config.api_url.is_empty() {
            DEFAULT_API_HOST.to_string()
        } else {
            config.api_url.trim_end_matches('/').to_string()
        };
        let token_url = if config.token_url.is_empty() {
            DEFAULT_TOKEN_URL.to_string()
        } else {
            config.token_url.clone()
        };
        Self {
            client: Client::new(),
            api_host,
            token_url,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            refresh_token: config.refresh_token.clone(),
            root_folder: if config.root_folder.is_empty() {
                "recvault".to_string()
            } else {
                config.root_folder.clone()
            },
            token: RwLock::new(None),
            folder_ids: Mutex::new(HashMap::new()),
        }
    }

    async fn refresh_access_token(&self) -> Result<String, TransferError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TransferError::Auth(format!(
                "token refresh rejected ({status}): {body}"
            )));
        }
        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|err| TransferError::Auth(format!("malformed token response: {err}")))?;

        *self.token.write().await = Some(token.access_token.clone());
        debug!("Drive access token refreshed");
        Ok(token.access_token)
    }

    async fn access_token(&self) -> Result<String, TransferError> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.refresh_access_token().await
    }

    /// Send a request built by `build`, refreshing the bearer token once
    /// on 401. The closure must build a fresh request each call.
    async fn send_authed<F>(&self, build: F) -> Result<reqwest::Response, TransferError>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let token = self.access_token().await?;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        debug!("Drive access token expired, refreshing");
        let token = self.refresh_access_token().await?;
        Ok(build(&token).send().await?)
    }

    /// Find the id of a child with `name` under `parent`, folders or files.
    async fn find_child(
        &self,
        name: &str,
        parent: Option<&str>,
        folders_only: bool,
    ) -> Result<Option<String>, TransferError> {
        let escaped = name.replace('\\', "\\\\").replace('\'', "\\'");
        let mut query = format!("name = '{escaped}' and trashed = false");
        if folders_only {
            query.push_str(&format!(" and mimeType = '{FOLDER_MIME}'"));
        } else {
            query.push_str(&format!(" and mimeType != '{FOLDER_MIME}'"));
        }
        if let Some(parent) = parent {
            query.push_str(&format!(" and '{parent}' in parents"));
        }

        let response = self
            .send_authed(|token| {
                self.client
                    .get(format!("{}/drive/v3/files", self.api_host))
                    .bearer_auth(token)
                    .query(&[("q", query.as_str()), ("fields", "files(id)")])
            })
            .await?;

        let list: DriveFileList = Self::parse_json(response).await?;
        Ok(list.files.into_iter().next().map(|file| file.id))
    }

    async fn create_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<String, TransferError> {
        let mut metadata = json!({ "name": name, "mimeType": FOLDER_MIME });
        if let Some(parent) = parent {
            metadata["parents"] = json!([parent]);
        }

        let response = self
            .send_authed(|token| {
                self.client
                    .post(format!("{}/drive/v3/files", self.api_host))
                    .bearer_auth(token)
                    .json(&metadata)
            })
            .await?;

        let file: DriveFile = Self::parse_json(response).await?;
        info!("Created Drive folder {name}");
        Ok(file.id)
    }

    /// Resolve (or create) the folder chain `root_folder/dest-folder`,
    /// returning the id of the deepest folder.
    async fn ensure_folder(&self, folder: &str) -> Result<String, TransferError> {
        let full_path = if folder.is_empty() {
            self.root_folder.clone()
        } else {
            format!("{}/{}", self.root_folder, folder)
        };

        if let Some(id) = self.folder_ids.lock().await.get(&full_path) {
            return Ok(id.clone());
        }

        let mut parent: Option<String> = None;
        for segment in full_path.split('/').filter(|s| !s.is_empty()) {
            let existing = self.find_child(segment, parent.as_deref(), true).await?;
            let id = match existing {
                Some(id) => id,
                None => self.create_folder(segment, parent.as_deref()).await?,
            };
            parent = Some(id);
        }

        let id = parent.ok_or_else(|| {
            TransferError::InvalidDestination("empty Drive folder path".to_string())
        })?;
        self.folder_ids
            .lock()
            .await
            .insert(full_path, id.clone());
        Ok(id)
    }

    /// Metadata-only create; content is uploaded separately to the id.
    async fn create_file_entry(
        &self,
        name: &str,
        folder_id: &str,
    ) -> Result<String, TransferError> {
        let response = self
            .send_authed(|token| {
                self.client
                    .post(format!("{}/drive/v3/files", self.api_host))
                    .bearer_auth(token)
                    .json(&json!({ "name": name, "parents": [folder_id] }))
            })
            .await?;
        let file: DriveFile = Self::parse_json(response).await?;
        Ok(file.id)
    }

    async fn upload_media(
        &self,
        file_id: &str,
        staged: &Path,
        size: u64,
    ) -> Result<(), TransferError> {
        // the body stream cannot be rebuilt by send_authed's closure, so
        // the token-expiry retry re-opens the file here instead
        let mut token = self.access_token().await?;
        for refreshed in [false, true] {
            let file = tokio::fs::File::open(staged).await?;
            let response = self
                .client
                .patch(format!(
                    "{}/upload/drive/v3/files/{file_id}?uploadType=media",
                    self.api_host
                ))
                .bearer_auth(&token)
                .header(reqwest::header::CONTENT_LENGTH, size)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
                .send()
                .await?;

            if response.status() == StatusCode::UNAUTHORIZED && !refreshed {
                debug!("Drive access token expired, refreshing");
                token = self.refresh_access_token().await?;
                continue;
            }
            let _file: DriveFile = Self::parse_json(response).await?;
            return Ok(());
        }
        unreachable!("second pass either returns or errors");
    }

    async fn remote_size(&self, file_id: &str) -> Result<Option<u64>, TransferError> {
        let response = self
            .send_authed(|token| {
                self.client
                    .get(format!("{}/drive/v3/files/{file_id}", self.api_host))
                    .bearer_auth(token)
                    .query(&[("fields", "size")])
            })
            .await?;
        let meta: DriveFileMeta = Self::parse_json(response).await?;
        Ok(meta.size.and_then(|raw| raw.parse().ok()))
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, TransferError> {
        let status = response.status();
        let body = response.text().await?;
        if status == StatusCode::UNAUTHORIZED {
            return Err(TransferError::Auth(format!("access token rejected: {body}")));
        }
        if !status.is_success() {
            return Err(TransferError::Api {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|err| TransferError::Api {
            status: status.as_u16(),
            body: format!("malformed response: {err}"),
        })
    }
}

#[async_trait]
impl StorageBackend for DriveBackend {
    fn describe(&self) -> String {
        format!("drive:{}", self.root_folder)
    }

    async fn place(
        &self,
        staged: &Path,
        dest: &DestinationSpec,
        progress: Option<ProgressFn>,
    ) -> Result<PlacedLocation, TransferError> {
        let size = tokio::fs::metadata(staged).await?.len();
        let folder_id = self.ensure_folder(&dest.folder).await?;

        let file_id = match self
            .find_child(&dest.filename, Some(&folder_id), false)
            .await?
        {
            Some(existing) => {
                debug!("Updating existing Drive file {} in place", dest.filename);
                existing
            }
            None => self.create_file_entry(&dest.filename, &folder_id).await?,
        };

        if let Some(report) = &progress {
            report(0, size);
        }
        self.upload_media(&file_id, staged, size).await?;
        if let Some(report) = &progress {
            report(size, size);
        }

        if dest.size > 0 {
            if let Some(actual) = self.remote_size(&file_id).await? {
                if actual != dest.size {
                    return Err(TransferError::Verification {
                        expected: dest.size,
                        actual,
                    });
                }
            }
        }

        Ok(PlacedLocation {
            uri: format!("drive://{file_id}"),
        })
    }
}
