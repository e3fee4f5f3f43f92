//! Backend contract consumed by the portal client.
//!
//! Request and response shapes follow the REST API one-to-one. Privileged
//! calls take the header set produced by [`crate::headers`] so the caller,
//! not the transport, decides which credential is attached.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::headers::RequestHeaders;

pub const MIN_MATERIAL_TEXT_CHARS: usize = 3;
pub const MIN_MATERIAL_GRADE: u8 = 5;
pub const MAX_MATERIAL_GRADE: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("portal_request_failed:{message}")]
    Network { message: String },
    #[error("portal_http_{status}:{}", .detail.as_deref().unwrap_or("<empty>"))]
    Rejected { status: u16, detail: Option<String> },
    #[error("portal_json_decode_failed:{message}")]
    Decode { message: String },
    #[error("portal_request_invalid:{message}")]
    InvalidRequest { message: String },
}

impl TransportError {
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MaterialInputError {
    #[error("title must have at least {min} characters", min = MIN_MATERIAL_TEXT_CHARS)]
    TitleTooShort,
    #[error("description must have at least {min} characters", min = MIN_MATERIAL_TEXT_CHARS)]
    DescriptionTooShort,
    #[error(
        "grade {grade} is outside {min}..={max}",
        grade = .0,
        min = MIN_MATERIAL_GRADE,
        max = MAX_MATERIAL_GRADE
    )]
    GradeOutOfRange(u8),
    #[error("a new material needs at least one file")]
    MissingFiles,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub firstname: String,
    pub lastname: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub grade: u8,
}

/// Sent form-urlencoded, as the OAuth2 password flow expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Multipart payload shared by material create and edit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MaterialUpload {
    pub title: String,
    pub description: String,
    pub grade: u8,
    pub thumbnail: Option<UploadFile>,
    pub files: Vec<UploadFile>,
    /// Stored file keys an edit keeps; ignored on create.
    pub existing_files: Vec<String>,
    /// Materials section the entry belongs to.
    pub path: String,
}

impl MaterialUpload {
    pub fn validate(&self, creating: bool) -> Result<(), MaterialInputError> {
        if self.title.trim().chars().count() < MIN_MATERIAL_TEXT_CHARS {
            return Err(MaterialInputError::TitleTooShort);
        }
        if self.description.trim().chars().count() < MIN_MATERIAL_TEXT_CHARS {
            return Err(MaterialInputError::DescriptionTooShort);
        }
        if !(MIN_MATERIAL_GRADE..=MAX_MATERIAL_GRADE).contains(&self.grade) {
            return Err(MaterialInputError::GradeOutOfRange(self.grade));
        }
        if creating && self.files.is_empty() {
            return Err(MaterialInputError::MissingFiles);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRecord {
    pub id: u64,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub files: Option<Vec<String>>,
    pub grade: u8,
    pub owner_id: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteMaterialRequest {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRemoval {
    pub detail: String,
    #[serde(default)]
    pub remaining_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserActionReceipt {
    pub detail: String,
    pub id: u64,
}

#[async_trait]
pub trait PortalTransport: Send + Sync {
    async fn register(&self, request: &RegisterRequest) -> Result<(), TransportError>;
    async fn login(&self, form: &LoginForm) -> Result<TokenResponse, TransportError>;
    async fn check_username(&self, username: &str) -> Result<Availability, TransportError>;
    async fn check_email(&self, email: &str) -> Result<Availability, TransportError>;

    async fn create_material(
        &self,
        headers: &RequestHeaders,
        upload: &MaterialUpload,
    ) -> Result<MaterialRecord, TransportError>;
    async fn edit_material(
        &self,
        headers: &RequestHeaders,
        material_id: u64,
        upload: &MaterialUpload,
    ) -> Result<(), TransportError>;
    async fn delete_material(
        &self,
        headers: &RequestHeaders,
        request: &DeleteMaterialRequest,
    ) -> Result<(), TransportError>;
    async fn remove_material_file(
        &self,
        headers: &RequestHeaders,
        material_id: u64,
        filename: &str,
    ) -> Result<FileRemoval, TransportError>;

    async fn approve_user(
        &self,
        headers: &RequestHeaders,
        user_id: u64,
    ) -> Result<UserActionReceipt, TransportError>;
    async fn revoke_user(
        &self,
        headers: &RequestHeaders,
        user_id: u64,
    ) -> Result<UserActionReceipt, TransportError>;
    async fn dismiss_user(
        &self,
        headers: &RequestHeaders,
        user_id: u64,
    ) -> Result<UserActionReceipt, TransportError>;
}
