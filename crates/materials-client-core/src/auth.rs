use serde::{Deserialize, Serialize};

use crate::transport::{LoginForm, RegisterRequest};

pub const DEFAULT_PORTAL_BASE_URL: &str = "http://127.0.0.1:8000";
pub const ENV_PORTAL_BASE_URL: &str = "MATERIALS_PORTAL_BASE_URL";
pub const BASE_URL_SOURCE_DEFAULT_LOCAL: &str = "default_local";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthInputError {
    #[error("base url must not be empty")]
    EmptyBaseUrl,
    #[error("base url must use http:// or https:// and include a host")]
    InvalidBaseUrl,
    #[error("username must not be empty")]
    EmptyUsername,
    #[error("email must not be empty")]
    EmptyEmail,
    #[error("password must not be empty")]
    EmptyPassword,
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("session token must be a non-empty cookie-safe value")]
    InvalidToken,
}

/// Registration form as the user filled it in, including the confirmation field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationForm {
    pub firstname: String,
    pub lastname: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub password2: String,
    pub grade: u8,
}

impl RegistrationForm {
    /// Checks the confirmation password and strips it from the wire payload.
    pub fn into_request(self) -> Result<RegisterRequest, AuthInputError> {
        if self.password != self.password2 {
            return Err(AuthInputError::PasswordMismatch);
        }
        Ok(RegisterRequest {
            firstname: self.firstname,
            lastname: self.lastname,
            username: self.username,
            email: self.email,
            password: self.password,
            grade: self.grade,
        })
    }
}

pub fn resolve_portal_base_url() -> Result<(String, &'static str), AuthInputError> {
    if let Some(base_url) = env_non_empty(ENV_PORTAL_BASE_URL) {
        return normalize_base_url(&base_url).map(|normalized| (normalized, ENV_PORTAL_BASE_URL));
    }
    normalize_base_url(DEFAULT_PORTAL_BASE_URL)
        .map(|normalized| (normalized, BASE_URL_SOURCE_DEFAULT_LOCAL))
}

pub fn normalize_base_url(raw: &str) -> Result<String, AuthInputError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AuthInputError::EmptyBaseUrl);
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(AuthInputError::InvalidBaseUrl);
    }
    let Some((_, remainder)) = trimmed.split_once("://") else {
        return Err(AuthInputError::InvalidBaseUrl);
    };
    if remainder.trim().is_empty() || remainder.starts_with('/') {
        return Err(AuthInputError::InvalidBaseUrl);
    }
    Ok(trimmed.to_string())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
}

/// Blank input means "nothing typed yet"; callers skip the availability query.
#[must_use]
pub fn normalize_lookup(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_login(username: &str, password: &str) -> Result<LoginForm, AuthInputError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AuthInputError::EmptyUsername);
    }
    if password.is_empty() {
        return Err(AuthInputError::EmptyPassword);
    }
    Ok(LoginForm {
        username: username.to_string(),
        password: password.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn with_env<T>(value: Option<&str>, test: impl FnOnce() -> T) -> T {
        let lock = ENV_LOCK.get_or_init(|| Mutex::new(()));
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let previous = std::env::var(ENV_PORTAL_BASE_URL).ok();
        if let Some(value) = value {
            unsafe { std::env::set_var(ENV_PORTAL_BASE_URL, value) };
        } else {
            unsafe { std::env::remove_var(ENV_PORTAL_BASE_URL) };
        }

        let result = test();

        if let Some(value) = previous {
            unsafe { std::env::set_var(ENV_PORTAL_BASE_URL, value) };
        } else {
            unsafe { std::env::remove_var(ENV_PORTAL_BASE_URL) };
        }
        result
    }

    fn registration(password: &str, password2: &str) -> RegistrationForm {
        RegistrationForm {
            firstname: "Ana".to_string(),
            lastname: "Pop".to_string(),
            username: "ana.pop".to_string(),
            email: "ana@school.ro".to_string(),
            password: password.to_string(),
            password2: password2.to_string(),
            grade: 6,
        }
    }

    #[test]
    fn normalize_base_url_trims_and_drops_trailing_slash() {
        let normalized = normalize_base_url(" https://portal.example.com/ ").expect("valid base url");
        assert_eq!(normalized, "https://portal.example.com");
    }

    #[test]
    fn normalize_base_url_requires_http_scheme_and_host() {
        assert_eq!(
            normalize_base_url("portal.example.com"),
            Err(AuthInputError::InvalidBaseUrl)
        );
        assert_eq!(
            normalize_base_url("https:///materials"),
            Err(AuthInputError::InvalidBaseUrl)
        );
        assert_eq!(normalize_base_url("  "), Err(AuthInputError::EmptyBaseUrl));
    }

    #[test]
    fn resolve_portal_base_url_defaults_local() {
        with_env(None, || {
            let (resolved, source) = resolve_portal_base_url().expect("default local url");
            assert_eq!(resolved, DEFAULT_PORTAL_BASE_URL);
            assert_eq!(source, BASE_URL_SOURCE_DEFAULT_LOCAL);
        });
    }

    #[test]
    fn resolve_portal_base_url_prefers_env() {
        with_env(Some("https://portal.school.ro/"), || {
            let (resolved, source) = resolve_portal_base_url().expect("env url");
            assert_eq!(resolved, "https://portal.school.ro");
            assert_eq!(source, ENV_PORTAL_BASE_URL);
        });
    }

    #[test]
    fn registration_rejects_mismatched_passwords() {
        let error = registration("a", "b").into_request().expect_err("mismatch");
        assert_eq!(error, AuthInputError::PasswordMismatch);
    }

    #[test]
    fn registration_drops_confirmation_field() {
        let request = registration("secret", "secret")
            .into_request()
            .expect("matching passwords");
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(json["password"], "secret");
        assert_eq!(json["grade"], 6);
        assert!(json.get("password2").is_none());
    }

    #[test]
    fn normalize_lookup_skips_blank_input() {
        assert_eq!(normalize_lookup("   "), None);
        assert_eq!(normalize_lookup(" ana "), Some("ana".to_string()));
    }

    #[test]
    fn normalize_login_requires_both_fields() {
        assert_eq!(
            normalize_login(" ", "pw").expect_err("blank username"),
            AuthInputError::EmptyUsername
        );
        assert_eq!(
            normalize_login("ana", "").expect_err("blank password"),
            AuthInputError::EmptyPassword
        );
        let form = normalize_login(" ana ", " pw ").expect("valid login");
        assert_eq!(form.username, "ana");
        assert_eq!(form.password, " pw ");
    }
}
