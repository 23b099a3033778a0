use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};
use url::Url;

use super::connect::connect;
use super::prompt;
use crate::backend::DocumentCapture;
use crate::cli::commands::register::Options;
use crate::cli::globals::GlobalArgs;
use crate::registration::types::RegistrationDraft;
use crate::registration::validation::{password_strength, PasswordStrength};
use crate::registration::{
    FlowError, IdentitySource, ProvisionedAccount, RegistrationConfig, RegistrationFlow,
    ScreenHost, StartedSession, VerifiedIdentity,
};

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub options: Options,
}

/// Execute the register action.
/// # Errors
/// Returns an error if the backend cannot be reached, a document image cannot
/// be read, or registration fails for good.
pub async fn execute(args: Args) -> Result<()> {
    let Args { globals, options } = args;
    let connection = connect(&globals).await?;

    let document = match &options.document {
        Some(front) => Some(read_capture(front, options.document_back.as_deref()).await?),
        None => None,
    };

    let mut flow = RegistrationFlow::new(&connection.backends, options.config.clone());
    let mut host = TerminalHost::new(
        options.language.clone(),
        options.return_url.clone(),
        document,
        &options.config,
    );

    match flow.run(&mut host, options.callback_url.as_ref()).await {
        Ok(account) => {
            info!(account_id = %account.account_id, "registration finished");
            Ok(())
        }
        Err(FlowError::Cancelled) => {
            println!("Registration cancelled.");
            Ok(())
        }
        Err(err) => Err(err).context("registration failed"),
    }
}

async fn read_capture(front: &Path, back: Option<&Path>) -> Result<DocumentCapture> {
    let front_image = tokio::fs::read(front)
        .await
        .with_context(|| format!("failed to read document image {}", front.display()))?;
    let back_image = match back {
        Some(path) => Some(
            tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read document image {}", path.display()))?,
        ),
        None => None,
    };
    debug!(front_bytes = front_image.len(), "document captured");
    Ok(DocumentCapture {
        front_image,
        back_image,
    })
}

/// Interactive terminal screens for the registration flow.
pub struct TerminalHost {
    language: String,
    return_url: Url,
    document: Option<DocumentCapture>,
    min_password_length: usize,
    strong_password_length: usize,
}

impl TerminalHost {
    #[must_use]
    pub fn new(
        language: String,
        return_url: Url,
        document: Option<DocumentCapture>,
        config: &RegistrationConfig,
    ) -> Self {
        Self {
            language,
            return_url,
            document,
            min_password_length: config.min_password_length(),
            strong_password_length: config.strong_password_length(),
        }
    }

    fn redirect(&self) -> IdentitySource {
        IdentitySource::Redirect {
            language: self.language.clone(),
            return_url: self.return_url.clone(),
        }
    }
}

fn identity_summary(identity: &VerifiedIdentity) -> String {
    format!(
        "Verified identity\n  Name:          {} {}\n  Date of birth: {}\n  National id:   {}",
        identity.first_name, identity.last_name, identity.date_of_birth, identity.document_number
    )
}

fn strength_label(strength: PasswordStrength) -> &'static str {
    match strength {
        PasswordStrength::Weak => "weak",
        PasswordStrength::Fair => "fair",
        PasswordStrength::Good => "good",
        PasswordStrength::Strong => "strong",
    }
}

fn account_summary(account: &ProvisionedAccount) -> String {
    let mut summary = format!(
        "Registration complete. Welcome, {} {}!\n  Account: {}\n  Phone:   {}",
        account.name, account.surname, account.account_id, account.phone_number
    );
    if let Some(email) = &account.email {
        summary.push_str(&format!("\n  Email:   {email}"));
    }
    summary
}

const SOURCE_REDIRECT: usize = 0;
const SOURCE_DOCUMENT: usize = 1;

#[async_trait]
impl ScreenHost for TerminalHost {
    async fn identity_source(&mut self) -> Option<IdentitySource> {
        if let Some(capture) = self.document.take() {
            return Some(IdentitySource::Document(capture));
        }

        let choice = prompt::select(
            "How do you want to verify your identity?",
            &[
                "Online verification (opens the provider's page)",
                "Photo of my identity document",
                "Cancel",
            ],
        )
        .await?;

        match choice {
            SOURCE_REDIRECT => Some(self.redirect()),
            SOURCE_DOCUMENT => {
                let path = prompt::text("Path to the front of your document", None, false).await?;
                match read_capture(Path::new(&path), None).await {
                    Ok(capture) => Some(IdentitySource::Document(capture)),
                    Err(err) => {
                        println!("{err:#}");
                        // Empty capture, reported by the flow as a failed capture.
                        Some(IdentitySource::Document(DocumentCapture::default()))
                    }
                }
            }
            _ => None,
        }
    }

    async fn open_verification(&mut self, session: &StartedSession) {
        println!("Open this link to verify your identity:\n  {}", session.redirect_url);
        println!("Waiting for the verification result...");
    }

    async fn contact_details(
        &mut self,
        identity: &VerifiedIdentity,
        draft: Option<&RegistrationDraft>,
    ) -> Option<(String, String)> {
        println!("{}", identity_summary(identity));

        let phone_number = prompt::text(
            "Phone number",
            draft.map(|draft| draft.phone_number.clone()),
            false,
        )
        .await?;
        let email = prompt::text(
            "Email (optional)",
            draft.and_then(|draft| draft.email.clone()),
            true,
        )
        .await?;
        Some((phone_number, email))
    }

    async fn credentials(&mut self) -> Option<(SecretString, SecretString)> {
        println!(
            "Choose a password of at least {} characters (leave empty to edit your details).",
            self.min_password_length
        );
        let password = prompt::secret("Password").await?;
        if password.expose_secret().is_empty() {
            return None;
        }

        let strength = password_strength(
            password.expose_secret(),
            self.min_password_length,
            self.strong_password_length,
        );
        println!("Password strength: {}", strength_label(strength));

        let confirmation = prompt::secret("Confirm password").await?;
        Some((password, confirmation))
    }

    async fn show_error(&mut self, error: &FlowError) {
        println!("{error}");
    }

    async fn completed(&mut self, account: &ProvisionedAccount) {
        println!("{}", account_summary(account));
    }
}

impl std::fmt::Debug for TerminalHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalHost")
            .field("language", &self.language)
            .field("return_url", &self.return_url.as_str())
            .field("document", &self.document.is_some())
            .finish_non_exhaustive()
    }
}
