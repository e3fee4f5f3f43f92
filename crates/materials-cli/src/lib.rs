use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use materials_api_client::{PortalClientConfig, PortalHttpClient};
use materials_client_core::auth::{normalize_base_url, resolve_portal_base_url};
use materials_client_core::session::PortalSession;
use materials_client_core::transport::{MaterialUpload, UploadFile};
use materials_client_core::{
    ActionOutcome, AuthState, CredentialStore, FieldCheck, FileCookieSlot, MessageTarget,
    Navigation, RegistrationForm, UserMessage,
};
use tracing::debug;

pub const ENV_COOKIE_FILE: &str = "MATERIALS_PORTAL_COOKIE_FILE";
const BASE_URL_SOURCE_FLAG: &str = "--base-url";
const CONFIG_DIR_NAME: &str = "materials-portal";
const COOKIE_FILE_NAME: &str = "cookies.json";

#[derive(Parser)]
#[command(name = "materials-portal")]
#[command(about = "Course materials portal client")]
pub struct PortalCli {
    /// Backend base URL. Defaults to `MATERIALS_PORTAL_BASE_URL`, then the local dev server.
    #[arg(long, global = true)]
    pub base_url: Option<String>,
    /// Cookie jar holding the session token between invocations.
    #[arg(long, global = true, env = ENV_COOKIE_FILE)]
    pub cookie_file: Option<PathBuf>,
    /// Per-request timeout; unset waits indefinitely.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,
    /// Materials section used for new uploads and post-delete navigation.
    #[arg(long, global = true)]
    pub current_path: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an account (pending teacher approval)
    Register(RegisterArgs),
    /// Sign in and store the session token
    Login {
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Forget the stored session token
    Logout,
    /// Show whether a session token is stored
    Status,
    /// Look up whether a username is free
    CheckUsername {
        username: String,
        /// Interpret the answer as the login page does
        #[arg(long)]
        for_login: bool,
    },
    /// Look up whether an email is free
    CheckEmail { email: String },
    /// Upload a new material, or edit one with --material-id
    SaveMaterial(SaveMaterialArgs),
    /// Delete a material
    DeleteMaterial { material_id: u64 },
    /// Remove one stored file from a material
    RemoveFile {
        filename: String,
        #[arg(long)]
        material_id: Option<u64>,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Approve a pending account
    Approve { user_id: u64 },
    /// Revoke an account's approval
    Revoke { user_id: u64 },
    /// Delete an account
    Dismiss {
        user_id: u64,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args)]
pub struct RegisterArgs {
    #[arg(long)]
    pub firstname: String,
    #[arg(long)]
    pub lastname: String,
    #[arg(long)]
    pub username: String,
    #[arg(long)]
    pub email: String,
    #[arg(long)]
    pub password: String,
    /// Repeat of --password
    #[arg(long)]
    pub password2: String,
    #[arg(long)]
    pub grade: u8,
}

#[derive(Args)]
pub struct SaveMaterialArgs {
    #[arg(long)]
    pub material_id: Option<u64>,
    #[arg(long)]
    pub title: String,
    #[arg(long)]
    pub description: String,
    #[arg(long)]
    pub grade: u8,
    /// File to attach; repeatable
    #[arg(long = "file")]
    pub files: Vec<PathBuf>,
    #[arg(long)]
    pub thumbnail: Option<PathBuf>,
    /// Stored file key to keep when editing; repeatable
    #[arg(long = "keep-file")]
    pub keep_files: Vec<String>,
    /// Section the material belongs to; defaults to --current-path
    #[arg(long)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    pub base_url: String,
    pub base_url_source: &'static str,
    pub cookie_file: PathBuf,
    pub timeout_ms: Option<u64>,
    pub current_path: Option<String>,
}

impl CliConfig {
    pub fn resolve(cli: &PortalCli) -> Result<Self> {
        let (base_url, base_url_source) = match cli.base_url.as_deref() {
            Some(raw) => (
                normalize_base_url(raw).context("invalid --base-url")?,
                BASE_URL_SOURCE_FLAG,
            ),
            None => resolve_portal_base_url().context("invalid portal base url")?,
        };
        let cookie_file = match cli.cookie_file.clone() {
            Some(path) => path,
            None => default_cookie_file()?,
        };
        Ok(Self {
            base_url,
            base_url_source,
            cookie_file,
            timeout_ms: cli.timeout_ms,
            current_path: cli.current_path.clone(),
        })
    }
}

pub fn default_cookie_file() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(COOKIE_FILE_NAME))
        .ok_or_else(|| anyhow!("no config directory found; pass --cookie-file"))
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

pub async fn run(cli: PortalCli) -> Result<ExitCode> {
    let config = CliConfig::resolve(&cli)?;
    debug!(
        base_url = %config.base_url,
        source = config.base_url_source,
        cookie_file = %config.cookie_file.display(),
        "resolved portal config"
    );

    let client = PortalHttpClient::new(PortalClientConfig {
        base_url: config.base_url.clone(),
        timeout_ms: config.timeout_ms,
    })?;
    let credentials = CredentialStore::new(FileCookieSlot::new(config.cookie_file.clone()));
    let mut session = PortalSession::new(credentials, client);
    if let Some(path) = config.current_path.clone() {
        session = session.with_current_path(path);
    }

    let rendered = match cli.command {
        Commands::Register(args) => {
            let form = RegistrationForm {
                firstname: args.firstname,
                lastname: args.lastname,
                username: args.username,
                email: args.email,
                password: args.password,
                password2: args.password2,
                grade: args.grade,
            };
            describe_outcome(&session.register(form).await)
        }
        Commands::Login { username, password } => {
            describe_outcome(&session.login(&username, &password).await?)
        }
        Commands::Logout => describe_outcome(&session.logout()?),
        Commands::Status => {
            let state = match session.auth_state()? {
                AuthState::Authenticated => "signed in",
                AuthState::Unauthenticated => "signed out",
            };
            Rendered::ok(vec![
                format!("{state} ({})", config.base_url),
                format!("cookie file: {}", config.cookie_file.display()),
            ])
        }
        Commands::CheckUsername {
            username,
            for_login,
        } => {
            let check = if for_login {
                session.check_username_for_login(&username).await
            } else {
                session.check_username_for_registration(&username).await
            };
            describe_field_check(&check)
        }
        Commands::CheckEmail { email } => {
            describe_field_check(&session.check_email_for_registration(&email).await)
        }
        Commands::SaveMaterial(args) => {
            let material_id = args.material_id;
            let upload = material_upload(args)?;
            describe_outcome(&session.save_material(material_id, upload).await?)
        }
        Commands::DeleteMaterial { material_id } => {
            describe_outcome(&session.delete_material(material_id).await?)
        }
        Commands::RemoveFile {
            filename,
            material_id,
            yes,
        } => describe_outcome(
            &session
                .remove_material_file(material_id, &filename, |prompt| {
                    yes || confirm_on_stdin(prompt)
                })
                .await?,
        ),
        Commands::Approve { user_id } => describe_outcome(&session.approve_user(user_id).await?),
        Commands::Revoke { user_id } => describe_outcome(&session.revoke_user(user_id).await?),
        Commands::Dismiss { user_id, yes } => describe_outcome(
            &session
                .dismiss_user(user_id, |prompt| yes || confirm_on_stdin(prompt))
                .await?,
        ),
    };

    let mut stdout = std::io::stdout().lock();
    for line in &rendered.lines {
        writeln!(stdout, "{line}")?;
    }
    Ok(if rendered.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Printable result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub success: bool,
    pub lines: Vec<String>,
}

impl Rendered {
    fn ok(lines: Vec<String>) -> Self {
        Self {
            success: true,
            lines,
        }
    }
}

pub fn describe_outcome(outcome: &ActionOutcome) -> Rendered {
    let mut lines = Vec::new();
    match &outcome.navigation {
        Some(Navigation::To(path)) => lines.push(format!("navigate: {path}")),
        Some(Navigation::Reload) => lines.push("reload".to_string()),
        Some(Navigation::RemoveUserRow(user_id)) => lines.push(format!("removed user {user_id}")),
        None => {}
    }
    if let Some(message) = &outcome.message {
        lines.push(describe_message(message));
    }

    // A declined confirmation is neither a success nor an error.
    let declined = !outcome.succeeded && outcome.navigation.is_none() && outcome.message.is_none();
    if declined {
        lines.push("cancelled".to_string());
    }
    Rendered {
        success: outcome.succeeded || declined,
        lines,
    }
}

pub fn describe_field_check(check: &FieldCheck) -> Rendered {
    match check {
        FieldCheck::Skipped => Rendered::ok(vec!["skipped: empty input".to_string()]),
        FieldCheck::Checked {
            available,
            submit_enabled,
            message,
        } => {
            let mut lines = vec![format!(
                "available: {available}, submit {}",
                if *submit_enabled { "enabled" } else { "disabled" }
            )];
            lines.extend(message.iter().map(describe_message));
            Rendered::ok(lines)
        }
        FieldCheck::Failed(message) => Rendered {
            success: false,
            lines: vec![describe_message(message)],
        },
    }
}

fn describe_message(message: &UserMessage) -> String {
    let label = match message.target {
        MessageTarget::Alert => "alert",
        MessageTarget::PasswordError => "password",
        MessageTarget::UsernameError => "username",
        MessageTarget::EmailError => "email",
    };
    format!("{label}: {}", message.text)
}

pub fn material_upload(args: SaveMaterialArgs) -> Result<MaterialUpload> {
    let files = args
        .files
        .iter()
        .map(PathBuf::as_path)
        .map(read_upload)
        .collect::<Result<Vec<_>>>()?;
    let thumbnail = args.thumbnail.as_deref().map(read_upload).transpose()?;
    Ok(MaterialUpload {
        title: args.title,
        description: args.description,
        grade: args.grade,
        thumbnail,
        files,
        existing_files: args.keep_files,
        path: args.path.unwrap_or_default(),
    })
}

fn read_upload(path: &Path) -> Result<UploadFile> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("not a file path: {}", path.display()))?
        .to_string();
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(UploadFile {
        content_type: guess_content_type(&file_name).map(str::to_string),
        file_name,
        bytes,
    })
}

pub fn guess_content_type(file_name: &str) -> Option<&'static str> {
    let extension = Path::new(file_name)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    let mime = match extension.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "txt" => "text/plain",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        _ => return None,
    };
    Some(mime)
}

/// A prompt that cannot be shown or answered counts as "no".
fn confirm_on_stdin(prompt: &str) -> bool {
    let answer = confirm(prompt, &mut std::io::stdin().lock(), &mut std::io::stderr());
    answer.unwrap_or_else(|error| {
        debug!(%error, "confirmation prompt failed");
        false
    })
}

pub fn confirm(
    prompt: &str,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> std::io::Result<bool> {
    write!(output, "{prompt} [y/N] ")?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use clap::error::ErrorKind;

    use super::*;

    #[test]
    fn cli_requires_subcommand() {
        let err = match PortalCli::try_parse_from(["materials-portal"]) {
            Ok(_) => panic!("expected missing subcommand parse error"),
            Err(err) => err,
        };
        assert_eq!(
            err.kind(),
            ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn cli_rejects_unknown_subcommand() {
        let err = match PortalCli::try_parse_from(["materials-portal", "unknown-subcommand"]) {
            Ok(_) => panic!("expected invalid subcommand parse error"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = PortalCli::try_parse_from([
            "materials-portal",
            "delete-material",
            "42",
            "--base-url",
            "https://portal.example.com/",
            "--cookie-file",
            "/tmp/portal-cookies.json",
            "--current-path",
            "/materials/math",
        ])
        .expect("parse");
        assert!(matches!(
            cli.command,
            Commands::DeleteMaterial { material_id: 42 }
        ));

        let config = CliConfig::resolve(&cli).expect("config");
        assert_eq!(config.base_url, "https://portal.example.com");
        assert_eq!(config.base_url_source, "--base-url");
        assert_eq!(
            config.cookie_file,
            PathBuf::from("/tmp/portal-cookies.json")
        );
        assert_eq!(config.current_path.as_deref(), Some("/materials/math"));
    }

    #[test]
    fn invalid_base_url_flag_is_rejected() {
        let cli = PortalCli::try_parse_from([
            "materials-portal",
            "--base-url",
            "portal.example.com",
            "--cookie-file",
            "/tmp/portal-cookies.json",
            "status",
        ])
        .expect("parse");
        assert!(CliConfig::resolve(&cli).is_err());
    }

    #[test]
    fn save_material_collects_repeated_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sheet = dir.path().join("sheet.PDF");
        let notes = dir.path().join("notes.txt");
        std::fs::write(&sheet, b"%PDF-1.4").expect("write sheet");
        std::fs::write(&notes, b"notes").expect("write notes");

        let cli = PortalCli::try_parse_from([
            "materials-portal",
            "save-material",
            "--title",
            "Fractions",
            "--description",
            "Worksheet with answers",
            "--grade",
            "6",
            "--file",
            sheet.to_str().expect("utf8 path"),
            "--file",
            notes.to_str().expect("utf8 path"),
            "--keep-file",
            "abc_old.pdf",
        ])
        .expect("parse");
        let Commands::SaveMaterial(args) = cli.command else {
            panic!("expected save-material");
        };
        assert_eq!(args.material_id, None);

        let upload = material_upload(args).expect("upload");
        assert_eq!(upload.files.len(), 2);
        assert_eq!(upload.files[0].file_name, "sheet.PDF");
        assert_eq!(upload.files[0].content_type.as_deref(), Some("application/pdf"));
        assert_eq!(upload.files[1].bytes, b"notes".to_vec());
        assert_eq!(upload.existing_files, vec!["abc_old.pdf".to_string()]);
        assert!(upload.path.is_empty());
        assert!(upload.thumbnail.is_none());
    }

    #[test]
    fn missing_upload_file_is_an_error() {
        let args = SaveMaterialArgs {
            material_id: Some(3),
            title: "Fractions".to_string(),
            description: "Worksheet".to_string(),
            grade: 6,
            files: vec![PathBuf::from("/definitely/not/here.pdf")],
            thumbnail: None,
            keep_files: Vec::new(),
            path: None,
        };
        let error = material_upload(args).expect_err("missing file");
        assert!(error.to_string().contains("here.pdf"));
    }

    #[test]
    fn content_type_guess_is_case_insensitive() {
        assert_eq!(guess_content_type("photo.JPG"), Some("image/jpeg"));
        assert!(
            guess_content_type("slides.pptx").is_some_and(|mime| mime.contains("presentation"))
        );
        assert_eq!(guess_content_type("archive.zip"), None);
        assert_eq!(guess_content_type("README"), None);
    }

    #[test]
    fn confirm_accepts_only_yes_answers() {
        let mut prompt = Vec::<u8>::new();
        let agreed = confirm("Delete?", &mut "Yes\n".as_bytes(), &mut prompt).expect("confirm");
        assert!(agreed);
        assert_eq!(String::from_utf8(prompt).expect("utf8"), "Delete? [y/N] ");

        for answer in ["\n", "n\n", "maybe\n", ""] {
            let declined = confirm("Delete?", &mut answer.as_bytes(), &mut Vec::<u8>::new())
                .expect("confirm");
            assert!(!declined, "{answer:?}");
        }
    }

    #[test]
    fn confirm_reports_unwritable_prompt() {
        struct ClosedPipe;

        impl Write for ClosedPipe {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            }
        }

        let error = confirm("Delete?", &mut "y\n".as_bytes(), &mut ClosedPipe)
            .expect_err("closed output");
        assert_eq!(error.kind(), std::io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn failed_outcome_renders_message_and_fails() {
        let outcome = ActionOutcome {
            succeeded: false,
            navigation: None,
            message: Some(UserMessage::inline(
                MessageTarget::PasswordError,
                "Incorrect password. Please try again!",
            )),
        };
        let rendered = describe_outcome(&outcome);
        assert!(!rendered.success);
        assert_eq!(
            rendered.lines,
            vec!["password: Incorrect password. Please try again!".to_string()]
        );
    }

    #[test]
    fn declined_outcome_is_not_a_failure() {
        let outcome = ActionOutcome {
            succeeded: false,
            navigation: None,
            message: None,
        };
        let rendered = describe_outcome(&outcome);
        assert!(rendered.success);
        assert_eq!(rendered.lines, vec!["cancelled".to_string()]);
    }

    #[test]
    fn reload_with_message_renders_both_lines() {
        let outcome = ActionOutcome {
            succeeded: true,
            navigation: Some(Navigation::Reload),
            message: Some(UserMessage::alert("File removed successfully!")),
        };
        assert_eq!(
            describe_outcome(&outcome).lines,
            vec![
                "reload".to_string(),
                "alert: File removed successfully!".to_string()
            ]
        );
    }

    #[test]
    fn field_check_failure_exits_non_zero() {
        let rendered = describe_field_check(&FieldCheck::Failed(UserMessage::alert("down")));
        assert!(!rendered.success);

        let taken = describe_field_check(&FieldCheck::Checked {
            available: false,
            submit_enabled: false,
            message: Some(UserMessage::inline(MessageTarget::EmailError, "taken")),
        });
        assert!(taken.success);
        assert_eq!(
            taken.lines,
            vec![
                "available: false, submit disabled".to_string(),
                "email: taken".to_string()
            ]
        );
    }
}
