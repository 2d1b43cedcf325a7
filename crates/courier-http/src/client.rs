//! REST client for the message API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use courier_shared::constants::UPLOAD_CHUNK_SIZE;
use courier_shared::{AttachmentRef, ChatMessage, MessagePage, NewMessage};
use courier_sync::{ApiError, LocalFile, MessageQuery, ProgressFn, RemoteApi};

use crate::upload::progress_body;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const FALLBACK_MIME: &str = "application/octet-stream";

/// Error payload returned by the server on failure.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

pub struct HttpApi {
    base_url: String,
    http: reqwest::Client,
    token: Option<String>,
    chunk_size: usize,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(network)?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            token: token.filter(|t| !t.is_empty()),
            chunk_size: UPLOAD_CHUNK_SIZE,
        })
    }

    /// Size of the pieces an upload body is streamed in.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = self.authorized(request).send().await.map_err(network)?;
        decode(response).await
    }
}

fn network(e: reqwest::Error) -> ApiError {
    ApiError::Network(e.to_string())
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.bytes().await.map_err(network)?;

    if !status.is_success() {
        let message = error_message(status, &body);
        warn!(status = status.as_u16(), %message, "Request rejected");
        return Err(ApiError::Status {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
}

fn error_message(status: StatusCode, body: &[u8]) -> String {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    parsed
        .error
        .or(parsed.message)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Request failed").to_string())
}

/// Query string of a listing call.
fn list_params(query: &MessageQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![("page", query.page.to_string())];
    if let Some(user) = query.target.counterpart() {
        params.push(("user_id", user.to_string()));
    }
    if let Some(after) = query.after {
        params.push(("after", after.to_rfc3339_opts(SecondsFormat::Millis, true)));
    }
    params
}

#[async_trait]
impl RemoteApi for HttpApi {
    async fn list_messages(&self, query: &MessageQuery) -> Result<MessagePage, ApiError> {
        let params = list_params(query);
        debug!(?params, "GET messages");
        self.send(self.http.get(self.url("messages")).query(&params))
            .await
    }

    async fn create_message(&self, message: &NewMessage) -> Result<ChatMessage, ApiError> {
        debug!(
            attachments = message.attachments.len(),
            "POST messages"
        );
        self.send(self.http.post(self.url("messages")).json(message))
            .await
    }

    async fn upload_attachment(
        &self,
        file: &LocalFile,
        progress: ProgressFn,
    ) -> Result<AttachmentRef, ApiError> {
        let total = file.size();
        // Bodies are lazy: a part dropped for its MIME type reports no progress.
        let part = |mime: &str| {
            let body = progress_body(file.data().clone(), self.chunk_size, progress.clone());
            Part::stream_with_length(body, total)
                .file_name(file.name().to_string())
                .mime_str(mime)
        };
        let part = match part(file.mime_type()) {
            Ok(part) => part,
            Err(e) => {
                warn!(
                    name = %file.name(),
                    mime = %file.mime_type(),
                    error = %e,
                    "Unusable MIME type, sending as {FALLBACK_MIME}"
                );
                part(FALLBACK_MIME).map_err(network)?
            }
        };
        let form = Form::new().part("file", part);

        debug!(name = %file.name(), size = total, "POST attachments");
        let reference = self
            .send(self.http.post(self.url("attachments")).multipart(form))
            .await?;
        progress(total, total);
        Ok(reference)
    }
}
