//! Client core for the course-materials portal: the session token held in a
//! cookie slot, the headers that carry it, and the handlers behind every user
//! action. The HTTP transport lives in `materials-api-client`.

#![cfg_attr(test, allow(clippy::expect_used, clippy::panic))]

pub mod auth;
pub mod cookie;
pub mod credential;
pub mod headers;
pub mod session;
pub mod transport;

pub use auth::{AuthInputError, RegistrationForm};
pub use cookie::{CookieSlot, CookieStoreError, FileCookieSlot, MemoryCookieSlot};
pub use credential::{AuthState, CredentialStore, SessionToken};
pub use headers::{BodyKind, RequestHeaders, build_headers, build_headers_for};
pub use session::{ActionOutcome, FieldCheck, MessageTarget, Navigation, PortalSession, UserMessage};
pub use transport::{PortalTransport, TransportError};
