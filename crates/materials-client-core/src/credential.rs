use std::fmt;

use crate::auth::AuthInputError;
use crate::cookie::{CookieSlot, CookieStoreError, DEFAULT_COOKIE_PATH, find_cookie};

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const EXPIRED_COOKIE_DATE: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// Opaque bearer credential issued at login. Never decoded client-side.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// Accepts visible ASCII only, minus the cookie separators, so the value
    /// is valid both as a cookie value and as an `Authorization` header.
    pub fn new(raw: impl Into<String>) -> Result<Self, AuthInputError> {
        let raw = raw.into();
        let cookie_safe = !raw.is_empty()
            && raw
                .bytes()
                .all(|byte| byte.is_ascii_graphic() && byte != b';' && byte != b',');
        if !cookie_safe {
            return Err(AuthInputError::InvalidToken);
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionToken").field(&"<redacted>").finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
}

/// Reads and writes the single session token held in a cookie slot.
#[derive(Debug)]
pub struct CredentialStore<S> {
    slot: S,
    cookie_name: String,
}

impl<S: CookieSlot> CredentialStore<S> {
    #[must_use]
    pub fn new(slot: S) -> Self {
        Self::with_cookie_name(slot, ACCESS_TOKEN_COOKIE)
    }

    #[must_use]
    pub fn with_cookie_name(slot: S, cookie_name: impl Into<String>) -> Self {
        Self {
            slot,
            cookie_name: cookie_name.into(),
        }
    }

    #[must_use]
    pub fn slot(&self) -> &S {
        &self.slot
    }

    pub fn set(&self, token: &SessionToken) -> Result<(), CookieStoreError> {
        self.slot.assign(&format!(
            "{}={}; path={DEFAULT_COOKIE_PATH}",
            self.cookie_name,
            token.as_str()
        ))
    }

    /// Empty or cookie-unsafe values read back as absent.
    pub fn get(&self) -> Result<Option<SessionToken>, CookieStoreError> {
        let header = self.slot.cookie_header()?;
        Ok(find_cookie(&header, &self.cookie_name).and_then(|value| SessionToken::new(value).ok()))
    }

    pub fn clear(&self) -> Result<(), CookieStoreError> {
        self.slot.assign(&format!(
            "{}=; path={DEFAULT_COOKIE_PATH}; expires={EXPIRED_COOKIE_DATE}",
            self.cookie_name
        ))
    }

    pub fn state(&self) -> Result<AuthState, CookieStoreError> {
        Ok(if self.get()?.is_some() {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        })
    }
}
