#![cfg_attr(test, allow(clippy::expect_used, clippy::panic))]

use std::time::Duration;

use async_trait::async_trait;
use materials_client_core::auth::normalize_base_url;
use materials_client_core::headers::{CONTENT_TYPE, RequestHeaders};
use materials_client_core::transport::{
    Availability, DeleteMaterialRequest, FileRemoval, LoginForm, MaterialRecord, MaterialUpload,
    PortalTransport, RegisterRequest, TokenResponse, TransportError, UploadFile,
    UserActionReceipt,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const MIN_TIMEOUT_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct PortalClientConfig {
    pub base_url: String,
    /// No timeout unless set; a hung request waits indefinitely.
    pub timeout_ms: Option<u64>,
}

impl PortalClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortalHttpClient {
    base_url: String,
    timeout: Option<Duration>,
    http: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum PortalClientError {
    #[error("portal_client_base_url_missing")]
    BaseUrlMissing,
    #[error("portal_client_base_url_invalid")]
    InvalidBaseUrl,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    detail: serde_json::Value,
}

impl PortalHttpClient {
    pub fn new(config: PortalClientConfig) -> Result<Self, PortalClientError> {
        let base_url = normalize_base_url(&config.base_url).map_err(|error| {
            if config.base_url.trim().is_empty() {
                PortalClientError::BaseUrlMissing
            } else {
                debug!(%error, "rejected portal base url");
                PortalClientError::InvalidBaseUrl
            }
        })?;
        Ok(Self {
            base_url,
            timeout: config
                .timeout_ms
                .map(|timeout_ms| Duration::from_millis(timeout_ms.max(MIN_TIMEOUT_MS))),
            http: reqwest::Client::new(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    #[must_use]
    pub fn register_path() -> &'static str {
        "/auth/"
    }

    #[must_use]
    pub fn token_path() -> &'static str {
        "/auth/token"
    }

    #[must_use]
    pub fn check_username_path() -> &'static str {
        "/auth/check-username"
    }

    #[must_use]
    pub fn check_email_path() -> &'static str {
        "/auth/check-email"
    }

    #[must_use]
    pub fn material_create_path() -> &'static str {
        "/materials/material"
    }

    #[must_use]
    pub fn material_edit_path(material_id: u64) -> String {
        format!("/materials/material/edit/{material_id}")
    }

    #[must_use]
    pub fn material_path(material_id: u64) -> String {
        format!("/materials/material/{material_id}")
    }

    #[must_use]
    pub fn material_file_path(material_id: u64) -> String {
        format!("/materials/material/{material_id}/file")
    }

    #[must_use]
    pub fn user_approve_path(user_id: u64) -> String {
        format!("/users/{user_id}/approve")
    }

    #[must_use]
    pub fn user_revoke_path(user_id: u64) -> String {
        format!("/users/{user_id}/revoke")
    }

    #[must_use]
    pub fn user_path(user_id: u64) -> String {
        format!("/users/{user_id}")
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        headers: Option<&RequestHeaders>,
    ) -> Result<reqwest::RequestBuilder, TransportError> {
        let url = self
            .endpoint(path)
            .ok_or_else(|| TransportError::InvalidRequest {
                message: format!("empty path for {method}"),
            })?;
        debug!(%method, %url, authorized = headers.is_some_and(has_authorization), "portal request");

        let mut request = self
            .http
            .request(method, url)
            .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()));
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        if let Some(headers) = headers {
            for (name, value) in headers {
                request = request.header(*name, value.as_str());
            }
        }
        Ok(request)
    }

    /// Multipart bodies carry their own boundary, so a caller-supplied
    /// `Content-Type` is dropped.
    fn multipart_request(
        &self,
        method: Method,
        path: &str,
        headers: &RequestHeaders,
        upload: &MaterialUpload,
    ) -> Result<reqwest::RequestBuilder, TransportError> {
        let headers = headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case(CONTENT_TYPE))
            .map(|(name, value)| (*name, value.clone()))
            .collect::<RequestHeaders>();
        Ok(self
            .request(method, path, Some(&headers))?
            .multipart(material_form(upload)?))
    }
}

#[async_trait]
impl PortalTransport for PortalHttpClient {
    async fn register(&self, request: &RegisterRequest) -> Result<(), TransportError> {
        let builder = self
            .request(Method::POST, Self::register_path(), None)?
            .json(request);
        expect_success(send(builder).await?).await
    }

    async fn login(&self, form: &LoginForm) -> Result<TokenResponse, TransportError> {
        let builder = self.request(Method::POST, Self::token_path(), None)?.form(form);
        decode_json_response(send(builder).await?).await
    }

    async fn check_username(&self, username: &str) -> Result<Availability, TransportError> {
        let builder = self
            .request(Method::GET, Self::check_username_path(), None)?
            .query(&[("username", username)]);
        decode_json_response(send(builder).await?).await
    }

    async fn check_email(&self, email: &str) -> Result<Availability, TransportError> {
        let builder = self
            .request(Method::GET, Self::check_email_path(), None)?
            .query(&[("email", email)]);
        decode_json_response(send(builder).await?).await
    }

    async fn create_material(
        &self,
        headers: &RequestHeaders,
        upload: &MaterialUpload,
    ) -> Result<MaterialRecord, TransportError> {
        let builder =
            self.multipart_request(Method::POST, Self::material_create_path(), headers, upload)?;
        decode_json_response(send(builder).await?).await
    }

    async fn edit_material(
        &self,
        headers: &RequestHeaders,
        material_id: u64,
        upload: &MaterialUpload,
    ) -> Result<(), TransportError> {
        let path = Self::material_edit_path(material_id);
        let builder = self.multipart_request(Method::PUT, &path, headers, upload)?;
        expect_success(send(builder).await?).await
    }

    async fn delete_material(
        &self,
        headers: &RequestHeaders,
        request: &DeleteMaterialRequest,
    ) -> Result<(), TransportError> {
        let path = Self::material_path(request.id);
        let builder = self
            .request(Method::DELETE, &path, Some(headers))?
            .json(request);
        expect_success(send(builder).await?).await
    }

    async fn remove_material_file(
        &self,
        headers: &RequestHeaders,
        material_id: u64,
        filename: &str,
    ) -> Result<FileRemoval, TransportError> {
        let path = Self::material_file_path(material_id);
        let builder = self
            .request(Method::DELETE, &path, Some(headers))?
            .query(&[("filename", filename)]);
        decode_json_response(send(builder).await?).await
    }

    async fn approve_user(
        &self,
        headers: &RequestHeaders,
        user_id: u64,
    ) -> Result<UserActionReceipt, TransportError> {
        let path = Self::user_approve_path(user_id);
        let builder = self.request(Method::PATCH, &path, Some(headers))?;
        decode_json_response(send(builder).await?).await
    }

    async fn revoke_user(
        &self,
        headers: &RequestHeaders,
        user_id: u64,
    ) -> Result<UserActionReceipt, TransportError> {
        let path = Self::user_revoke_path(user_id);
        let builder = self.request(Method::PATCH, &path, Some(headers))?;
        decode_json_response(send(builder).await?).await
    }

    async fn dismiss_user(
        &self,
        headers: &RequestHeaders,
        user_id: u64,
    ) -> Result<UserActionReceipt, TransportError> {
        let path = Self::user_path(user_id);
        let builder = self.request(Method::DELETE, &path, Some(headers))?;
        decode_json_response(send(builder).await?).await
    }
}

fn has_authorization(headers: &RequestHeaders) -> bool {
    headers
        .keys()
        .any(|name| name.eq_ignore_ascii_case(materials_client_core::headers::AUTHORIZATION))
}

fn material_form(upload: &MaterialUpload) -> Result<Form, TransportError> {
    let mut form = Form::new()
        .text("title", upload.title.clone())
        .text("description", upload.description.clone())
        .text("grade", upload.grade.to_string())
        .text("path", upload.path.clone());
    for file in &upload.files {
        form = form.part("files", file_part(file)?);
    }
    if let Some(thumbnail) = upload.thumbnail.as_ref() {
        form = form.part("thumbnail", file_part(thumbnail)?);
    }
    for existing in &upload.existing_files {
        form = form.text("existing_files", existing.clone());
    }
    Ok(form)
}

fn file_part(file: &UploadFile) -> Result<Part, TransportError> {
    let part = Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());
    match file.content_type.as_deref() {
        Some(content_type) => {
            part.mime_str(content_type)
                .map_err(|error| TransportError::InvalidRequest {
                    message: format!("{}: {error}", file.file_name),
                })
        }
        None => Ok(part),
    }
}

async fn send(request: reqwest::RequestBuilder) -> Result<reqwest::Response, TransportError> {
    request.send().await.map_err(|error| {
        warn!(%error, "portal request failed before a response arrived");
        TransportError::Network {
            message: error.to_string(),
        }
    })
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> TransportError {
    let detail = match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(envelope) => match envelope.detail {
            serde_json::Value::Null => None,
            serde_json::Value::String(detail) => non_empty_string(detail),
            other => Some(other.to_string()),
        },
        Err(_) => non_empty_string(String::from_utf8_lossy(body).to_string()),
    };
    TransportError::Rejected {
        status: status.as_u16(),
        detail,
    }
}

async fn read_success_body(response: reqwest::Response) -> Result<Vec<u8>, TransportError> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| TransportError::Network {
            message: error.to_string(),
        })?;
    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }
    Ok(bytes.to_vec())
}

async fn expect_success(response: reqwest::Response) -> Result<(), TransportError> {
    read_success_body(response).await.map(|_| ())
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, TransportError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let bytes = read_success_body(response).await?;
    serde_json::from_slice::<T>(&bytes).map_err(|error| TransportError::Decode {
        message: error.to_string(),
    })
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
