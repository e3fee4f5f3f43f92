use std::collections::BTreeMap;

use crate::cookie::{CookieSlot, CookieStoreError};
use crate::credential::{CredentialStore, SessionToken};

pub const AUTHORIZATION: &str = "Authorization";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const APPLICATION_JSON: &str = "application/json";

pub type RequestHeaders = BTreeMap<&'static str, String>;

/// Body encoding of the outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    /// The transport owns `Content-Type` so it can add the multipart boundary.
    Multipart,
}

/// Authorization is attached only when a token exists.
#[must_use]
pub fn build_headers_for(token: Option<&SessionToken>, body: BodyKind) -> RequestHeaders {
    let mut headers = RequestHeaders::new();
    if let Some(token) = token {
        headers.insert(AUTHORIZATION, token.bearer());
    }
    if body == BodyKind::Json {
        headers.insert(CONTENT_TYPE, APPLICATION_JSON.to_string());
    }
    headers
}

#[must_use]
pub fn build_headers(token: Option<&SessionToken>) -> RequestHeaders {
    build_headers_for(token, BodyKind::Json)
}

impl<S: CookieSlot> CredentialStore<S> {
    pub fn authorized_headers(&self, body: BodyKind) -> Result<RequestHeaders, CookieStoreError> {
        let token = self.get()?;
        Ok(build_headers_for(token.as_ref(), body))
    }
}
