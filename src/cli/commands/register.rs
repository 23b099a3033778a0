use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use url::Url;

use crate::registration::RegistrationConfig;

pub const CMD_REGISTER: &str = "register";
pub const ARG_LANGUAGE: &str = "language";
pub const ARG_RETURN_URL: &str = "return-url";
pub const ARG_CALLBACK_URL: &str = "callback-url";
pub const ARG_DOCUMENT: &str = "document";
pub const ARG_DOCUMENT_BACK: &str = "document-back";
pub const ARG_POLL_INTERVAL: &str = "poll-interval-seconds";
pub const ARG_PLACEHOLDER_DOMAIN: &str = "placeholder-email-domain";

#[derive(Debug, Clone)]
pub struct Options {
    pub language: String,
    pub return_url: Url,
    pub callback_url: Option<Url>,
    pub document: Option<PathBuf>,
    pub document_back: Option<PathBuf>,
    pub config: RegistrationConfig,
}

impl Options {
    /// Parse the `register` subcommand arguments.
    ///
    /// # Errors
    /// Returns an error if a URL does not parse.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let language = matches
            .get_one::<String>(ARG_LANGUAGE)
            .cloned()
            .unwrap_or_else(|| "en".to_string());

        let return_url = matches
            .get_one::<String>(ARG_RETURN_URL)
            .context("missing required argument: --return-url")?;
        let return_url =
            Url::parse(return_url).with_context(|| format!("invalid --{ARG_RETURN_URL}"))?;

        let callback_url = matches
            .get_one::<String>(ARG_CALLBACK_URL)
            .filter(|v| !v.trim().is_empty())
            .map(|raw| Url::parse(raw).with_context(|| format!("invalid --{ARG_CALLBACK_URL}")))
            .transpose()?;

        let mut config = RegistrationConfig::new();
        if let Some(seconds) = matches.get_one::<u64>(ARG_POLL_INTERVAL) {
            config = config.with_poll_interval(Duration::from_secs(*seconds));
        }
        if let Some(domain) = matches.get_one::<String>(ARG_PLACEHOLDER_DOMAIN) {
            config = config.with_placeholder_email_domain(domain.clone());
        }

        Ok(Self {
            language,
            return_url,
            callback_url,
            document: matches.get_one::<PathBuf>(ARG_DOCUMENT).cloned(),
            document_back: matches.get_one::<PathBuf>(ARG_DOCUMENT_BACK).cloned(),
            config,
        })
    }
}

#[must_use]
pub fn command() -> Command {
    Command::new(CMD_REGISTER)
        .about("Register as a voter")
        .arg(
            Arg::new(ARG_LANGUAGE)
                .long(ARG_LANGUAGE)
                .help("Language of the hosted verification pages")
                .env("SOVS_LANGUAGE")
                .default_value("en"),
        )
        .arg(
            Arg::new(ARG_RETURN_URL)
                .long(ARG_RETURN_URL)
                .help("Where the verification provider redirects when done")
                .env("SOVS_RETURN_URL")
                .default_value("https://sovs.local/register/callback"),
        )
        .arg(
            Arg::new(ARG_CALLBACK_URL)
                .long(ARG_CALLBACK_URL)
                .help("Resume from the URL the verification provider redirected to")
                .long_help(
                    "Resume from the URL the verification provider redirected to.\n\nThe `session_id` query parameter takes precedence over the session remembered from the previous run.",
                )
                .conflicts_with(ARG_DOCUMENT),
        )
        .arg(
            Arg::new(ARG_DOCUMENT)
                .long(ARG_DOCUMENT)
                .help("Verify locally from an image of the front of your identity document")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_DOCUMENT_BACK)
                .long(ARG_DOCUMENT_BACK)
                .help("Image of the back of your identity document")
                .requires(ARG_DOCUMENT)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_POLL_INTERVAL)
                .long(ARG_POLL_INTERVAL)
                .help("Seconds between verification status checks")
                .env("SOVS_POLL_INTERVAL_SECONDS")
                .default_value("3")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_PLACEHOLDER_DOMAIN)
                .long(ARG_PLACEHOLDER_DOMAIN)
                .help("Email domain used when no email is given")
                .env("SOVS_PLACEHOLDER_EMAIL_DOMAIN")
                .default_value("sovs.local"),
        )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_register_defaults() {
        temp_env::with_vars(
            [
                ("SOVS_LANGUAGE", None::<&str>),
                ("SOVS_RETURN_URL", None),
                ("SOVS_POLL_INTERVAL_SECONDS", None),
                ("SOVS_PLACEHOLDER_EMAIL_DOMAIN", None),
            ],
            || {
                let matches = command().get_matches_from(vec![CMD_REGISTER]);
                let options = Options::parse(&matches).unwrap();
                assert_eq!(options.language, "en");
                assert_eq!(
                    options.return_url.as_str(),
                    "https://sovs.local/register/callback"
                );
                assert!(options.callback_url.is_none());
                assert!(options.document.is_none());
                assert_eq!(options.config.poll_interval(), Duration::from_secs(3));
                assert_eq!(options.config.placeholder_email_domain(), "sovs.local");
            },
        );
    }

    #[test]
    fn test_register_overrides() {
        let matches = command().get_matches_from(vec![
            CMD_REGISTER,
            "--language",
            "es",
            "--callback-url",
            "https://sovs.local/register/callback?session_id=abc",
            "--poll-interval-seconds",
            "5",
            "--placeholder-email-domain",
            "voters.example",
        ]);
        let options = Options::parse(&matches).unwrap();
        assert_eq!(options.language, "es");
        assert_eq!(
            options.callback_url.map(|url| url.query().map(str::to_string)),
            Some(Some("session_id=abc".to_string()))
        );
        assert_eq!(options.config.poll_interval(), Duration::from_secs(5));
        assert_eq!(options.config.placeholder_email_domain(), "voters.example");
    }

    #[test]
    fn test_document_back_requires_front() {
        let result =
            command().try_get_matches_from(vec![CMD_REGISTER, "--document-back", "back.jpg"]);
        assert_eq!(
            result.map(|_| ()).map_err(|e| e.kind()),
            Err(clap::error::ErrorKind::MissingRequiredArgument)
        );
    }

    #[test]
    fn test_callback_conflicts_with_document() {
        let result = command().try_get_matches_from(vec![
            CMD_REGISTER,
            "--document",
            "front.jpg",
            "--callback-url",
            "https://sovs.local/register/callback",
        ]);
        assert_eq!(
            result.map(|_| ()).map_err(|e| e.kind()),
            Err(clap::error::ErrorKind::ArgumentConflict)
        );
    }
}
