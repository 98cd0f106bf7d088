//! HTTP client for the meeting platform's REST API.
//!
//! Handles the server-to-server OAuth token grant, paged listing of users
//! and recordings, streamed file downloads into staging, and source-side
//! deletion. All endpoints are relative to the configured base URLs.

use super::{ProgressFn, RecordingSource, SourceError, UserAccount};
use crate::config::SourceConfig;
use crate::recording::{FileDescriptor, RecordingDescriptor};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, NaiveDate};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const PAGE_SIZE: u32 = 300;

pub struct HttpSource {
    client: Client,
    api_base: String,
    auth_base: String,
    account_id: String,
    client_id: String,
    client_secret: String,
    token: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserListResponse {
    #[serde(default)]
    page_count: u32,
    #[serde(default)]
    users: Vec<ApiUser>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct RecordingListResponse {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    meetings: Vec<ApiRecording>,
}

#[derive(Debug, Deserialize)]
struct ApiRecording {
    uuid: String,
    #[serde(default)]
    topic: String,
    start_time: String,
    #[serde(default)]
    recording_files: Vec<ApiRecordingFile>,
}

#[derive(Debug, Deserialize)]
struct ApiRecordingFile {
    id: String,
    #[serde(default)]
    file_type: String,
    #[serde(default)]
    file_extension: String,
    #[serde(default)]
    file_size: u64,
    download_url: String,
    #[serde(default)]
    recording_type: Option<String>,
}

impl HttpSource {
    /// Build a client and validate credentials by fetching an access token.
    pub async fn connect(config: &SourceConfig) -> Result<Self, SourceError> {
        let source = Self {
            client: Client::new(),
            api_base: config.api_base_url.trim_end_matches('/').to_string(),
            auth_base: config.auth_base_url.trim_end_matches('/').to_string(),
            account_id: config.account_id.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            token: RwLock::new(None),
        };
        source.refresh_token().await?;
        info!("Authenticated against {}", source.api_base);
        Ok(source)
    }

    async fn refresh_token(&self) -> Result<String, SourceError> {
        let url = format!(
            "{}/token?grant_type=account_credentials&account_id={}",
            self.auth_base, self.account_id
        );
        let credential = BASE64.encode(format!("{}:{}", self.client_id, self.client_secret));

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Basic {credential}"))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SourceError::Auth(format!(
                "token grant rejected ({status}): {body}"
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|err| SourceError::Auth(format!("malformed token response: {err}")))?;

        *self.token.write().await = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    async fn bearer_token(&self) -> Result<String, SourceError> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.refresh_token().await
    }

    /// GET with bearer auth; one token refresh on 401 before giving up.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        let mut token = self.bearer_token().await?;
        for refreshed in [false, true] {
            let response = self
                .client
                .get(url)
                .bearer_auth(&token)
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !refreshed {
                debug!("Access token expired, refreshing");
                token = self.refresh_token().await?;
                continue;
            }

            let body = response.text().await?;
            if !status.is_success() {
                return Err(SourceError::Api {
                    status: status.as_u16(),
                    body,
                });
            }
            return serde_json::from_str(&body).map_err(|err| SourceError::Api {
                status: status.as_u16(),
                body: format!("malformed response: {err}"),
            });
        }
        unreachable!("second pass either returns or errors");
    }

    fn recordings_url(&self, user_id: &str) -> Result<Url, SourceError> {
        let mut url = Url::parse(&format!("{}/users", self.api_base))
            .map_err(|err| SourceError::Auth(format!("invalid api_base_url: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| SourceError::Auth("api_base_url cannot be a base URL".to_string()))?
            .push(user_id)
            .push("recordings");
        Ok(url)
    }

    fn convert_recording(&self, api: ApiRecording, account: &str) -> Option<RecordingDescriptor> {
        let start_time = match DateTime::parse_from_rfc3339(&api.start_time) {
            Ok(instant) => instant.naive_utc(),
            Err(err) => {
                warn!(
                    "Skipping recording {} with unparseable start time {:?}: {err}",
                    api.uuid, api.start_time
                );
                return None;
            }
        };

        let files = api
            .recording_files
            .into_iter()
            .map(|file| {
                let recording_type = if file.file_type.is_empty() {
                    "incomplete".to_string()
                } else if file.file_type == "TIMELINE" {
                    file.file_type.clone()
                } else {
                    file.recording_type
                        .clone()
                        .unwrap_or_else(|| file.file_type.clone())
                };
                FileDescriptor {
                    file_id: file.id,
                    extension: file.file_extension.to_lowercase(),
                    size: file.file_size,
                    locator: file.download_url,
                    recording_type,
                }
            })
            .collect();

        Some(RecordingDescriptor {
            id: api.uuid,
            account: account.to_string(),
            topic: api.topic,
            start_time,
            files,
        })
    }
}

#[async_trait]
impl RecordingSource for HttpSource {
    async fn list_users(&self, include_inactive: bool) -> Result<Vec<UserAccount>, SourceError> {
        let statuses: &[&str] = if include_inactive {
            &["active", "inactive"]
        } else {
            &["active"]
        };

        let mut all_users = Vec::new();
        for status in statuses {
            let first_page: UserListResponse = self
                .get_json(&format!(
                    "{}/users?status={status}&page_size={PAGE_SIZE}&page_number=1",
                    self.api_base
                ))
                .await?;
            let page_count = first_page.page_count.max(1);
            let mut pages = vec![first_page];

            for page_number in 2..=page_count {
                pages.push(
                    self.get_json(&format!(
                        "{}/users?status={status}&page_size={PAGE_SIZE}&page_number={page_number}",
                        self.api_base
                    ))
                    .await?,
                );
            }

            let found = pages.iter().map(|p| p.users.len()).sum::<usize>();
            info!("Found {found} {status} users");

            all_users.extend(pages.into_iter().flat_map(|page| page.users).map(|user| {
                UserAccount {
                    active: user.status == "active",
                    id: user.id,
                    email: user.email,
                }
            }));
        }

        Ok(all_users)
    }

    async fn list_recordings(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RecordingDescriptor>, SourceError> {
        let base = self.recordings_url(user_id)?;
        let mut recordings = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = base.clone();
            url.query_pairs_mut()
                .append_pair("from", &start.format("%Y-%m-%d").to_string())
                .append_pair("to", &end.format("%Y-%m-%d").to_string())
                .append_pair("page_size", &PAGE_SIZE.to_string());
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("next_page_token", token);
            }

            let page: RecordingListResponse = self.get_json(url.as_str()).await?;
            recordings.extend(
                page.meetings
                    .into_iter()
                    .filter_map(|api| self.convert_recording(api, user_id)),
            );

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(recordings)
    }

    async fn download_file(
        &self,
        locator: &str,
        expected_size: u64,
        file_id: &str,
        dest: &Path,
        progress: Option<ProgressFn>,
    ) -> Result<(), SourceError> {
        let token = self.bearer_token().await?;
        let mut url = Url::parse(locator).map_err(|err| SourceError::Api {
            status: 0,
            body: format!("invalid download locator: {err}"),
        })?;
        url.query_pairs_mut().append_pair("access_token", &token);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Api {
                status: status.as_u16(),
                body: format!("download rejected for file {file_id}"),
            });
        }

        let total = response.content_length().unwrap_or(expected_size);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;

        let mut written: u64 = 0;
        let mut response = response;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if let Some(report) = &progress {
                report(written, total);
            }
        }
        file.flush().await?;
        drop(file);

        if expected_size > 0 && written != expected_size {
            tokio::fs::remove_file(dest).await.ok();
            return Err(SourceError::SizeMismatch {
                file_id: file_id.to_string(),
                expected: expected_size,
                actual: written,
            });
        }

        Ok(())
    }

    async fn delete_recording(&self, recording_id: &str) -> Result<(), SourceError> {
        let token = self.bearer_token().await?;
        let mut url = Url::parse(&format!("{}/meetings", self.api_base)).map_err(|err| {
            SourceError::Api {
                status: 0,
                body: format!("invalid api_base_url: {err}"),
            }
        })?;
        url.path_segments_mut()
            .map_err(|_| SourceError::Api {
                status: 0,
                body: "api_base_url cannot be a base URL".to_string(),
            })?
            .push(recording_id)
            .push("recordings");

        let response = self.client.delete(url).bearer_auth(&token).send().await?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            Ok(())
        } else if status == StatusCode::NOT_FOUND {
            warn!("Recording {recording_id} already absent from source");
            Ok(())
        } else {
            Err(SourceError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}
