use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{builder::PossibleValuesParser, Arg, ArgMatches, Command};
use secrecy::SecretString;
use url::Url;

use crate::cli::globals::{BackendTarget, GlobalArgs};

pub const ARG_BACKEND: &str = "backend";
pub const ARG_FUNCTIONS_URL: &str = "functions-url";
pub const ARG_AUTH_URL: &str = "auth-url";
pub const ARG_ANON_KEY: &str = "anon-key";
pub const ARG_STORAGE_PATH: &str = "storage-path";

const BACKEND_LIVE: &str = "live";
const BACKEND_MOCK: &str = "mock";

/// Parse the backend selection into [`GlobalArgs`].
///
/// # Errors
/// Returns an error if the live backend is selected without its endpoints
/// and key, or an endpoint is not a valid URL.
pub fn parse(matches: &ArgMatches) -> anyhow::Result<GlobalArgs> {
    let storage_path = matches
        .get_one::<PathBuf>(ARG_STORAGE_PATH)
        .cloned()
        .context("missing required argument: --storage-path")?;

    let backend = matches
        .get_one::<String>(ARG_BACKEND)
        .map_or(BACKEND_MOCK, String::as_str);

    if backend != BACKEND_LIVE {
        return Ok(GlobalArgs::new(BackendTarget::Mock, storage_path));
    }

    // Env vars set to "" come through as empty strings.
    let get_non_empty = |id: &str| {
        matches
            .get_one::<String>(id)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let parse_url = |id: &str| -> anyhow::Result<Url> {
        let Some(raw) = get_non_empty(id) else {
            bail!("missing required argument: --{id} (required for the live backend)");
        };
        Url::parse(&raw).with_context(|| format!("invalid --{id}: {raw}"))
    };

    let functions_url = parse_url(ARG_FUNCTIONS_URL)?;
    let auth_url = parse_url(ARG_AUTH_URL)?;
    let Some(anon_key) = get_non_empty(ARG_ANON_KEY) else {
        bail!("missing required argument: --{ARG_ANON_KEY} (required for the live backend)");
    };

    Ok(GlobalArgs::new(
        BackendTarget::Live {
            functions_url,
            auth_url,
            anon_key: SecretString::from(anon_key),
        },
        storage_path,
    ))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BACKEND)
                .long(ARG_BACKEND)
                .help("Collaborator backend")
                .long_help(
                    "Collaborator backend.\n\n`mock` runs everything in process with a seeded government registry and a demo voter (+1987654321). `live` talks to the hosted functions and auth APIs.",
                )
                .env("SOVS_BACKEND")
                .default_value(BACKEND_MOCK)
                .value_parser(PossibleValuesParser::new([BACKEND_LIVE, BACKEND_MOCK]))
                .global(true),
        )
        .arg(
            Arg::new(ARG_FUNCTIONS_URL)
                .long(ARG_FUNCTIONS_URL)
                .help("Base URL of the hosted functions API")
                .env("SOVS_FUNCTIONS_URL")
                .global(true),
        )
        .arg(
            Arg::new(ARG_AUTH_URL)
                .long(ARG_AUTH_URL)
                .help("Base URL of the hosted auth API")
                .env("SOVS_AUTH_URL")
                .global(true),
        )
        .arg(
            Arg::new(ARG_ANON_KEY)
                .long(ARG_ANON_KEY)
                .help("Public API key sent with every backend request")
                .env("SOVS_ANON_KEY")
                .hide_env_values(true)
                .global(true),
        )
        .arg(
            Arg::new(ARG_STORAGE_PATH)
                .long(ARG_STORAGE_PATH)
                .help("File holding the registration draft and login session")
                .env("SOVS_STORAGE_PATH")
                .default_value(".sovs/state.json")
                .value_parser(clap::value_parser!(PathBuf))
                .global(true),
        )
}
