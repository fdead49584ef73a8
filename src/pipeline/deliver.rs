//! Delivery submitter: hand one merged PDF to Pingen as a letter.
//!
//! Four dependent calls, no retries:
//!
//! 1. client-credentials token from the identity service
//! 2. one-time upload URL plus signature
//! 3. raw `PUT` of the PDF to that URL
//! 4. JSON:API letter creation referencing the uploaded file
//!
//! Any failure is scoped to the cover task being submitted.

use crate::config::PingenConfig;
use crate::document::MergedDocument;
use crate::error::{PostlinkError, TaskError};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

const JSON_API: &str = "application/vnd.api+json";
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
/// Error bodies are cut to this many characters in messages.
const BODY_SNIPPET: usize = 300;

/// A letter the provider accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOrder {
    pub id: String,
    pub file_name: String,
}

#[async_trait]
pub trait Deliver: Send + Sync {
    async fn submit(&self, document: &MergedDocument) -> Result<DeliveryOrder, TaskError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct FileUpload {
    attributes: UploadSlot,
}

/// Where to `PUT` the file, and the signature proving we did.
#[derive(Debug, Clone, Deserialize)]
struct UploadSlot {
    url: String,
    url_signature: String,
}

#[derive(Debug, Deserialize)]
struct Letter {
    id: String,
}

/// The JSON:API body registering an uploaded file as a letter.
fn letter_request(file_name: &str, file_url: &str, file_url_signature: &str) -> Value {
    json!({
        "data": {
            "type": "letters",
            "attributes": {
                "file_original_name": file_name,
                "file_url": file_url,
                "file_url_signature": file_url_signature,
                "address_position": "left",
                "auto_send": true,
                "delivery_product": "cheap",
                "print_mode": "duplex",
                "print_spectrum": "color",
            }
        }
    })
}

/// Turn a non-2xx response into `make(detail)`; pass 2xx through.
async fn check(
    response: reqwest::Response,
    make: fn(String) -> TaskError,
) -> Result<reqwest::Response, TaskError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(BODY_SNIPPET).collect();
    Err(make(format!("HTTP {status}: {}", snippet.trim())))
}

fn token_err(detail: String) -> TaskError {
    TaskError::Token { detail }
}
fn upload_url_err(detail: String) -> TaskError {
    TaskError::UploadUrl { detail }
}
fn upload_err(detail: String) -> TaskError {
    TaskError::Upload { detail }
}
fn letter_err(detail: String) -> TaskError {
    TaskError::CreateLetter { detail }
}

/// [`Deliver`] implementation for the Pingen v2 API.
pub struct PingenClient {
    http: reqwest::Client,
    config: PingenConfig,
}

impl PingenClient {
    pub fn new(config: PingenConfig) -> Result<Self, PostlinkError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| PostlinkError::Internal(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    fn identity(&self, path: &str) -> String {
        format!("{}{path}", self.config.identity_url.trim_end_matches('/'))
    }

    fn api(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url.trim_end_matches('/'))
    }

    async fn access_token(&self) -> Result<String, TaskError> {
        let response = self
            .http
            .post(self.identity("/auth/access-tokens"))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| token_err(e.to_string()))?;
        let token: TokenResponse = check(response, token_err)
            .await?
            .json()
            .await
            .map_err(|e| token_err(format!("bad token response: {e}")))?;
        Ok(token.access_token)
    }

    async fn upload_slot(&self, token: &str) -> Result<UploadSlot, TaskError> {
        let response = self
            .http
            .get(self.api("/file-upload"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| upload_url_err(e.to_string()))?;
        let envelope: Envelope<FileUpload> = check(response, upload_url_err)
            .await?
            .json()
            .await
            .map_err(|e| upload_url_err(format!("bad file-upload response: {e}")))?;
        Ok(envelope.data.attributes)
    }

    async fn put_file(&self, slot: &UploadSlot, bytes: Vec<u8>) -> Result<(), TaskError> {
        let response = self
            .http
            .put(&slot.url)
            .header(CONTENT_TYPE, "application/pdf")
            .body(bytes)
            .send()
            .await
            .map_err(|e| upload_err(e.to_string()))?;
        check(response, upload_err).await?;
        Ok(())
    }

    async fn create_letter(
        &self,
        token: &str,
        slot: &UploadSlot,
        file_name: &str,
    ) -> Result<String, TaskError> {
        let body = letter_request(file_name, &slot.url, &slot.url_signature);
        let response = self
            .http
            .post(self.api(&format!(
                "/organisations/{}/letters",
                self.config.organisation_id
            )))
            .bearer_auth(token)
            .header(CONTENT_TYPE, JSON_API)
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| letter_err(e.to_string()))?;
        let letter: Envelope<Letter> = check(response, letter_err)
            .await?
            .json()
            .await
            .map_err(|e| letter_err(format!("bad letter response: {e}")))?;
        Ok(letter.data.id)
    }
}

#[async_trait]
impl Deliver for PingenClient {
    async fn submit(&self, document: &MergedDocument) -> Result<DeliveryOrder, TaskError> {
        let file_name = document.file_name();
        info!("uploading '{}' to pingen", document.path.display());

        // ── Step 1: token ───────────────────────────────────────────────
        let token = self.access_token().await?;
        debug!("pingen access token acquired");

        // ── Step 2: upload slot ─────────────────────────────────────────
        let slot = self.upload_slot(&token).await?;
        debug!("pingen upload slot issued");

        // ── Step 3: file ────────────────────────────────────────────────
        self.put_file(&slot, document.bytes.clone()).await?;
        debug!("uploaded {} bytes", document.bytes.len());

        // ── Step 4: letter ──────────────────────────────────────────────
        let id = self.create_letter(&token, &slot, &file_name).await?;
        Ok(DeliveryOrder { id, file_name })
    }
}
