//! Browser-style cookie slot.
//!
//! A slot accepts `name=value; path=/; expires=...` assignment strings and
//! exposes the `name=value; name2=value2` header form, mirroring how a page
//! script sees `document.cookie`. Assignments whose expiry is already in the
//! past delete the matching cookie instead of storing it.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_COOKIE_PATH: &str = "/";

/// The jar holds the bearer token; owner read/write only.
#[cfg(unix)]
const JAR_FILE_MODE: u32 = 0o600;

#[derive(Debug, thiserror::Error)]
pub enum CookieStoreError {
    #[error("cookie_assignment_missing_name")]
    MissingName,
    #[error("cookie_assignment_invalid_expires:{value}")]
    InvalidExpires { value: String },
    #[error("cookie_assignment_invalid_max_age:{value}")]
    InvalidMaxAge { value: String },
    #[error("cookie_store_io_failed:{path}:{source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cookie_store_decode_failed:{path}:{source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted key-value slot holding cookies for one origin.
pub trait CookieSlot {
    /// Returns the unexpired cookies in `name=value; name2=value2` form.
    fn cookie_header(&self) -> Result<String, CookieStoreError>;

    /// Applies a single `Set-Cookie`-style assignment.
    fn assign(&self, assignment: &str) -> Result<(), CookieStoreError>;
}

impl<T: CookieSlot + ?Sized> CookieSlot for &T {
    fn cookie_header(&self) -> Result<String, CookieStoreError> {
        (**self).cookie_header()
    }

    fn assign(&self, assignment: &str) -> Result<(), CookieStoreError> {
        (**self).assign(assignment)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
}

impl StoredCookie {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_none_or(|expires| expires > now)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieJar {
    #[serde(default)]
    cookies: Vec<StoredCookie>,
}

impl CookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, assignment: &str, now: DateTime<Utc>) -> Result<(), CookieStoreError> {
        let parsed = parse_assignment(assignment, now)?;
        self.cookies
            .retain(|cookie| !(cookie.name == parsed.cookie.name && cookie.path == parsed.cookie.path));
        if !parsed.expired {
            self.cookies.push(parsed.cookie);
        }
        Ok(())
    }

    #[must_use]
    pub fn header(&self, now: DateTime<Utc>) -> String {
        self.cookies
            .iter()
            .filter(|cookie| cookie.is_live(now))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Drops cookies whose expiry has passed since they were stored.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) {
        self.cookies.retain(|cookie| cookie.is_live(now));
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

struct ParsedAssignment {
    cookie: StoredCookie,
    expired: bool,
}

fn parse_assignment(
    assignment: &str,
    now: DateTime<Utc>,
) -> Result<ParsedAssignment, CookieStoreError> {
    let mut parts = assignment.split(';');
    let pair = parts.next().unwrap_or_default();
    let (name, value) = pair.split_once('=').unwrap_or(("", pair));
    let name = name.trim();
    if name.is_empty() {
        return Err(CookieStoreError::MissingName);
    }

    let mut path = DEFAULT_COOKIE_PATH.to_string();
    let mut expires = None;
    let mut max_age: Option<i64> = None;

    for attribute in parts {
        let (key, attr_value) = attribute.split_once('=').unwrap_or((attribute, ""));
        let attr_value = attr_value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "path" if !attr_value.is_empty() => path = attr_value.to_string(),
            "expires" => {
                let parsed = DateTime::parse_from_rfc2822(attr_value).map_err(|_| {
                    CookieStoreError::InvalidExpires {
                        value: attr_value.to_string(),
                    }
                })?;
                expires = Some(parsed.with_timezone(&Utc));
            }
            "max-age" => {
                let seconds = attr_value.parse::<i64>().map_err(|_| {
                    CookieStoreError::InvalidMaxAge {
                        value: attr_value.to_string(),
                    }
                })?;
                max_age = Some(seconds);
            }
            _ => {}
        }
    }

    // max-age wins over expires when both are present.
    if let Some(seconds) = max_age {
        expires = Some(
            chrono::Duration::try_seconds(seconds.max(0))
                .and_then(|ttl| now.checked_add_signed(ttl))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
    }
    let expired = expires.is_some_and(|expires| expires <= now);

    Ok(ParsedAssignment {
        cookie: StoredCookie {
            name: name.to_string(),
            value: value.trim().to_string(),
            path,
            expires,
        },
        expired,
    })
}

/// Finds the first cookie called `name` in a `name=value; ...` header.
#[must_use]
pub fn find_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|entry| {
        let (key, value) = entry.split_once('=')?;
        (key.trim() == name).then(|| value.trim())
    })
}

/// Slot that lives as long as the process, like a browser session.
#[derive(Debug, Default)]
pub struct MemoryCookieSlot {
    jar: Mutex<CookieJar>,
}

impl MemoryCookieSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CookieSlot for MemoryCookieSlot {
    fn cookie_header(&self) -> Result<String, CookieStoreError> {
        let jar = self.jar.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(jar.header(Utc::now()))
    }

    fn assign(&self, assignment: &str) -> Result<(), CookieStoreError> {
        let mut jar = self.jar.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        jar.apply(assignment, Utc::now())
    }
}

/// Slot persisted as a JSON cookie jar so it survives between invocations.
#[derive(Debug, Clone)]
pub struct FileCookieSlot {
    path: PathBuf,
}

impl FileCookieSlot {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<CookieJar, CookieStoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CookieJar::new());
            }
            Err(source) => {
                return Err(CookieStoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(CookieJar::new());
        }
        serde_json::from_slice(&bytes).map_err(|source| CookieStoreError::Decode {
            path: self.path.clone(),
            source,
        })
    }

    /// Writes through a uniquely named sibling file so concurrent writers
    /// never share a staging path; the last rename wins.
    fn store(&self, jar: &CookieJar) -> Result<(), CookieStoreError> {
        let io_error = |source| CookieStoreError::Io {
            path: self.path.clone(),
            source,
        };
        let parent = match self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            Some(parent) => {
                std::fs::create_dir_all(parent).map_err(io_error)?;
                parent
            }
            None => Path::new("."),
        };
        let bytes = serde_json::to_vec_pretty(jar).map_err(|source| CookieStoreError::Decode {
            path: self.path.clone(),
            source,
        })?;

        let mut staging = tempfile::NamedTempFile::new_in(parent).map_err(io_error)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            staging
                .as_file()
                .set_permissions(std::fs::Permissions::from_mode(JAR_FILE_MODE))
                .map_err(io_error)?;
        }
        staging.write_all(&bytes).map_err(io_error)?;
        staging.as_file().sync_all().map_err(io_error)?;
        staging
            .persist(&self.path)
            .map_err(|error| io_error(error.error))?;
        Ok(())
    }
}

impl CookieSlot for FileCookieSlot {
    fn cookie_header(&self) -> Result<String, CookieStoreError> {
        Ok(self.load()?.header(Utc::now()))
    }

    fn assign(&self, assignment: &str) -> Result<(), CookieStoreError> {
        let now = Utc::now();
        let mut jar = self.load()?;
        jar.apply(assignment, now)?;
        jar.purge_expired(now);
        self.store(&jar)
    }
}
