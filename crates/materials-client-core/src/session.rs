//! User-action handlers.
//!
//! Each handler validates its input, attaches credentials when the call is
//! privileged, issues at most one request and turns the response into an
//! [`ActionOutcome`]: where to go next and what to tell the user. Transport
//! failures become messages; only cookie-slot failures surface as `Err`.

use tracing::{debug, info, warn};

use crate::auth::{RegistrationForm, normalize_login, normalize_lookup};
use crate::cookie::{CookieSlot, CookieStoreError};
use crate::credential::{AuthState, CredentialStore, SessionToken};
use crate::headers::BodyKind;
use crate::transport::{
    Availability, DeleteMaterialRequest, MaterialUpload, PortalTransport, TransportError,
};

pub const HOME_PAGE: &str = "/";
pub const LOGIN_PAGE: &str = "/auth/login-page";
pub const MATERIALS_MAIN_PAGE: &str = "/materials/main-page";
pub const DEFAULT_MATERIALS_PATH: &str = "/materials";

pub const PASSWORD_MISMATCH_MESSAGE: &str = "Passwords do not match!";
pub const PENDING_APPROVAL_MESSAGE: &str =
    "Your account was created, but a teacher still has to approve it!";
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Incorrect password. Please try again!";
pub const GENERIC_FAILURE_MESSAGE: &str = "An error occurred. Please try again later.";
pub const USERNAME_TAKEN_MESSAGE: &str =
    "This username is already taken, register with another one!";
pub const EMAIL_TAKEN_MESSAGE: &str = "An account is already associated with this email.";
pub const UNKNOWN_USERNAME_MESSAGE: &str = "There is no account with this username.";
pub const MISSING_MATERIAL_ID_MESSAGE: &str = "Material ID was not found!";
pub const NOT_AUTHENTICATED_MESSAGE: &str = "You are not authenticated!";
pub const FILE_REMOVED_MESSAGE: &str = "File removed successfully!";
pub const APPROVE_FALLBACK_MESSAGE: &str = "Could not approve user";
pub const REVOKE_FALLBACK_MESSAGE: &str = "Could not revoke approval";
pub const DISMISS_FALLBACK_MESSAGE: &str = "Could not dismiss user";
pub const DISMISS_CONFIRM_PROMPT: &str = "Are you sure you want to delete this user?";

/// Where a message is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    /// Blocking dialog.
    Alert,
    PasswordError,
    UsernameError,
    EmailError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMessage {
    pub target: MessageTarget,
    pub text: String,
}

impl UserMessage {
    #[must_use]
    pub fn alert(text: impl Into<String>) -> Self {
        Self {
            target: MessageTarget::Alert,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn inline(target: MessageTarget, text: impl Into<String>) -> Self {
        Self {
            target,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    To(String),
    Reload,
    RemoveUserRow(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub succeeded: bool,
    pub navigation: Option<Navigation>,
    pub message: Option<UserMessage>,
}

impl ActionOutcome {
    fn navigate(path: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            navigation: Some(Navigation::To(path.into())),
            message: None,
        }
    }

    fn completed(navigation: Navigation, message: Option<UserMessage>) -> Self {
        Self {
            succeeded: true,
            navigation: Some(navigation),
            message,
        }
    }

    fn failed(message: UserMessage) -> Self {
        Self {
            succeeded: false,
            navigation: None,
            message: Some(message),
        }
    }

    fn declined() -> Self {
        Self {
            succeeded: false,
            navigation: None,
            message: None,
        }
    }
}

/// Result of an availability lookup run when a field loses focus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldCheck {
    /// Blank input; nothing was sent.
    Skipped,
    Checked {
        available: bool,
        submit_enabled: bool,
        /// `None` clears the inline error.
        message: Option<UserMessage>,
    },
    Failed(UserMessage),
}

pub struct PortalSession<S, T> {
    credentials: CredentialStore<S>,
    transport: T,
    current_path: Option<String>,
}

impl<S: CookieSlot, T: PortalTransport> PortalSession<S, T> {
    #[must_use]
    pub fn new(credentials: CredentialStore<S>, transport: T) -> Self {
        Self {
            credentials,
            transport,
            current_path: None,
        }
    }

    /// Last materials section the user browsed.
    #[must_use]
    pub fn with_current_path(mut self, path: impl Into<String>) -> Self {
        self.current_path = Some(path.into()).filter(|path: &String| !path.trim().is_empty());
        self
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialStore<S> {
        &self.credentials
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[must_use]
    pub fn current_path(&self) -> &str {
        self.current_path.as_deref().unwrap_or(DEFAULT_MATERIALS_PATH)
    }

    pub fn auth_state(&self) -> Result<AuthState, CookieStoreError> {
        self.credentials.state()
    }

    pub async fn register(&self, form: RegistrationForm) -> ActionOutcome {
        let request = match form.into_request() {
            Ok(request) => request,
            Err(error) => {
                debug!(%error, "registration rejected before sending");
                return ActionOutcome::failed(UserMessage::alert(PASSWORD_MISMATCH_MESSAGE));
            }
        };

        match self.transport.register(&request).await {
            Ok(()) => {
                info!(username = %request.username, "registration accepted");
                ActionOutcome::navigate(LOGIN_PAGE)
            }
            Err(error) => {
                warn!(%error, "registration failed");
                ActionOutcome::failed(rejection_alert(&error, "Error "))
            }
        }
    }

    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<ActionOutcome, CookieStoreError> {
        let form = match normalize_login(username, password) {
            Ok(form) => form,
            Err(error) => {
                return Ok(ActionOutcome::failed(UserMessage::inline(
                    MessageTarget::PasswordError,
                    error.to_string(),
                )));
            }
        };

        let response = match self.transport.login(&form).await {
            Ok(response) => response,
            Err(TransportError::Rejected { status, .. }) => {
                warn!(status, "login rejected");
                let text = if status == 403 {
                    PENDING_APPROVAL_MESSAGE
                } else {
                    INVALID_CREDENTIALS_MESSAGE
                };
                return Ok(ActionOutcome::failed(UserMessage::inline(
                    MessageTarget::PasswordError,
                    text,
                )));
            }
            Err(error) => {
                warn!(%error, "login request failed");
                return Ok(ActionOutcome::failed(UserMessage::alert(
                    GENERIC_FAILURE_MESSAGE,
                )));
            }
        };

        let Ok(token) = SessionToken::new(response.access_token) else {
            warn!("login response carried an unusable access token");
            return Ok(ActionOutcome::failed(UserMessage::alert(
                GENERIC_FAILURE_MESSAGE,
            )));
        };

        self.credentials.clear()?;
        self.credentials.set(&token)?;
        info!(username = %form.username, "session established");
        Ok(ActionOutcome::navigate(MATERIALS_MAIN_PAGE))
    }

    /// Purely local; the backend is not told.
    pub fn logout(&self) -> Result<ActionOutcome, CookieStoreError> {
        self.credentials.clear()?;
        info!("session cleared");
        Ok(ActionOutcome::navigate(HOME_PAGE))
    }

    pub async fn check_username_for_registration(&self, raw: &str) -> FieldCheck {
        let Some(username) = normalize_lookup(raw) else {
            return FieldCheck::Skipped;
        };
        let result = self.transport.check_username(&username).await;
        taken_means_blocked(result, MessageTarget::UsernameError, USERNAME_TAKEN_MESSAGE)
    }

    pub async fn check_email_for_registration(&self, raw: &str) -> FieldCheck {
        let Some(email) = normalize_lookup(raw) else {
            return FieldCheck::Skipped;
        };
        let result = self.transport.check_email(&email).await;
        taken_means_blocked(result, MessageTarget::EmailError, EMAIL_TAKEN_MESSAGE)
    }

    /// On the login page an *available* username means there is no such account.
    pub async fn check_username_for_login(&self, raw: &str) -> FieldCheck {
        let Some(username) = normalize_lookup(raw) else {
            return FieldCheck::Skipped;
        };
        match self.transport.check_username(&username).await {
            Ok(Availability { available }) => FieldCheck::Checked {
                available,
                submit_enabled: !available,
                message: available.then(|| {
                    UserMessage::inline(MessageTarget::UsernameError, UNKNOWN_USERNAME_MESSAGE)
                }),
            },
            Err(error) => {
                warn!(%error, "username lookup failed");
                FieldCheck::Failed(UserMessage::alert(GENERIC_FAILURE_MESSAGE))
            }
        }
    }

    /// Creates a material when `material_id` is `None`, otherwise edits it.
    pub async fn save_material(
        &self,
        material_id: Option<u64>,
        mut upload: MaterialUpload,
    ) -> Result<ActionOutcome, CookieStoreError> {
        if let Err(error) = upload.validate(material_id.is_none()) {
            return Ok(ActionOutcome::failed(UserMessage::alert(error.to_string())));
        }
        if upload.path.trim().is_empty() {
            upload.path = self.current_path().to_string();
        }

        let headers = self.credentials.authorized_headers(BodyKind::Multipart)?;
        let result = match material_id {
            None => self
                .transport
                .create_material(&headers, &upload)
                .await
                .map(|record| {
                    info!(material_id = record.id, path = %upload.path, "material created");
                    MATERIALS_MAIN_PAGE.to_string()
                }),
            Some(id) => self
                .transport
                .edit_material(&headers, id, &upload)
                .await
                .map(|()| {
                    info!(material_id = id, "material updated");
                    format!("/materials/view/{id}")
                }),
        };

        Ok(match result {
            Ok(target) => ActionOutcome::navigate(target),
            Err(error) => {
                warn!(%error, ?material_id, "material save failed");
                ActionOutcome::failed(rejection_alert(&error, "Error: "))
            }
        })
    }

    pub async fn delete_material(&self, material_id: u64) -> Result<ActionOutcome, CookieStoreError> {
        let headers = self.credentials.authorized_headers(BodyKind::Json)?;
        let request = DeleteMaterialRequest { id: material_id };
        Ok(match self.transport.delete_material(&headers, &request).await {
            Ok(()) => {
                info!(material_id, "material deleted");
                ActionOutcome::navigate(self.current_path())
            }
            Err(error) => {
                warn!(%error, material_id, "material delete failed");
                ActionOutcome::failed(rejection_alert(&error, "Error: "))
            }
        })
    }

    /// `confirm` receives the prompt and returns whether the user agreed.
    pub async fn remove_material_file(
        &self,
        material_id: Option<u64>,
        filename: &str,
        confirm: impl FnOnce(&str) -> bool,
    ) -> Result<ActionOutcome, CookieStoreError> {
        let Some(material_id) = material_id else {
            return Ok(ActionOutcome::failed(UserMessage::alert(
                MISSING_MATERIAL_ID_MESSAGE,
            )));
        };
        let Some(token) = self.credentials.get()? else {
            return Ok(ActionOutcome::failed(UserMessage::alert(
                NOT_AUTHENTICATED_MESSAGE,
            )));
        };
        if !confirm(&format!("Are you sure you want to delete {filename}?")) {
            return Ok(ActionOutcome::declined());
        }

        let headers = crate::headers::build_headers(Some(&token));
        Ok(
            match self
                .transport
                .remove_material_file(&headers, material_id, filename)
                .await
            {
                Ok(removal) => {
                    info!(
                        material_id,
                        remaining = removal.remaining_files.len(),
                        "material file removed"
                    );
                    ActionOutcome::completed(
                        Navigation::Reload,
                        Some(UserMessage::alert(FILE_REMOVED_MESSAGE)),
                    )
                }
                Err(error) => {
                    warn!(%error, material_id, "material file removal failed");
                    ActionOutcome::failed(rejection_alert(&error, "Error: "))
                }
            },
        )
    }

    pub async fn approve_user(&self, user_id: u64) -> Result<ActionOutcome, CookieStoreError> {
        let headers = self.credentials.authorized_headers(BodyKind::Json)?;
        let result = self.transport.approve_user(&headers, user_id).await;
        Ok(admin_outcome(result, Navigation::Reload, APPROVE_FALLBACK_MESSAGE))
    }

    pub async fn revoke_user(&self, user_id: u64) -> Result<ActionOutcome, CookieStoreError> {
        let headers = self.credentials.authorized_headers(BodyKind::Json)?;
        let result = self.transport.revoke_user(&headers, user_id).await;
        Ok(admin_outcome(result, Navigation::Reload, REVOKE_FALLBACK_MESSAGE))
    }

    pub async fn dismiss_user(
        &self,
        user_id: u64,
        confirm: impl FnOnce(&str) -> bool,
    ) -> Result<ActionOutcome, CookieStoreError> {
        if !confirm(DISMISS_CONFIRM_PROMPT) {
            return Ok(ActionOutcome::declined());
        }
        let headers = self.credentials.authorized_headers(BodyKind::Json)?;
        let result = self.transport.dismiss_user(&headers, user_id).await;
        Ok(admin_outcome(
            result,
            Navigation::RemoveUserRow(user_id),
            DISMISS_FALLBACK_MESSAGE,
        ))
    }
}

fn taken_means_blocked(
    result: Result<Availability, TransportError>,
    target: MessageTarget,
    taken_message: &str,
) -> FieldCheck {
    match result {
        Ok(Availability { available }) => FieldCheck::Checked {
            available,
            submit_enabled: available,
            message: (!available).then(|| UserMessage::inline(target, taken_message)),
        },
        Err(error) => {
            warn!(%error, "availability lookup failed");
            FieldCheck::Failed(UserMessage::alert(GENERIC_FAILURE_MESSAGE))
        }
    }
}

fn rejection_alert(error: &TransportError, prefix: &str) -> UserMessage {
    match error {
        TransportError::Rejected {
            detail: Some(detail),
            ..
        } => UserMessage::alert(format!("{prefix}{detail}")),
        TransportError::Rejected {
            status,
            detail: None,
        } => UserMessage::alert(format!("{prefix}request rejected with status {status}")),
        TransportError::Network { .. }
        | TransportError::Decode { .. }
        | TransportError::InvalidRequest { .. } => {
            UserMessage::alert(GENERIC_FAILURE_MESSAGE)
        }
    }
}

fn admin_outcome<R: std::fmt::Debug>(
    result: Result<R, TransportError>,
    navigation: Navigation,
    fallback: &str,
) -> ActionOutcome {
    match result {
        Ok(receipt) => {
            info!(?receipt, "admin action applied");
            ActionOutcome::completed(navigation, None)
        }
        Err(TransportError::Rejected { status, detail }) => {
            warn!(status, "admin action rejected");
            ActionOutcome::failed(UserMessage::alert(
                detail.unwrap_or_else(|| fallback.to_string()),
            ))
        }
        Err(error) => {
            warn!(%error, "admin action failed");
            ActionOutcome::failed(UserMessage::alert(GENERIC_FAILURE_MESSAGE))
        }
    }
}
