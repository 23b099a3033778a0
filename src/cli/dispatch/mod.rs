//! Command-line argument dispatch.
//!
//! Parses validated CLI arguments and maps them to the action the binary
//! executes, with the backend selection resolved once for every subcommand.

use crate::cli::actions::{login, register, Action};
use crate::cli::commands::{self, backend};
use anyhow::{bail, Result};

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let globals = backend::parse(matches)?;

    match matches.subcommand() {
        Some((commands::register::CMD_REGISTER, sub)) => {
            let options = commands::register::Options::parse(sub)?;
            Ok(Action::Register(register::Args { globals, options }))
        }
        Some((commands::login::CMD_LOGIN, sub)) => {
            let options = commands::login::Options::parse(sub);
            Ok(Action::Login(login::Args { globals, options }))
        }
        Some((commands::login::CMD_LOGOUT, _)) => Ok(Action::Logout(globals)),
        Some((commands::login::CMD_WHOAMI, _)) => Ok(Action::WhoAmI(globals)),
        Some((other, _)) => bail!("unknown subcommand: {other}"),
        None => bail!("missing subcommand"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleared<F: FnOnce()>(f: F) {
        temp_env::with_vars(
            [
                ("SOVS_BACKEND", None::<&str>),
                ("SOVS_FUNCTIONS_URL", None),
                ("SOVS_AUTH_URL", None),
                ("SOVS_ANON_KEY", None),
                ("SOVS_RETURN_URL", None),
            ],
            f,
        );
    }

    #[test]
    fn register_action() {
        cleared(|| {
            let matches = commands::new().get_matches_from(vec![
                "sovs",
                "register",
                "--document",
                "front.jpg",
            ]);
            let action = handler(&matches).unwrap_or_else(|e| panic!("{e}"));
            let Action::Register(args) = action else {
                panic!("expected register action");
            };
            assert!(args.globals.is_mock());
            assert_eq!(
                args.options.document.as_deref(),
                Some(std::path::Path::new("front.jpg"))
            );
        });
    }

    #[test]
    fn session_actions() {
        cleared(|| {
            let logout = handler(&commands::new().get_matches_from(vec!["sovs", "logout"]));
            assert!(matches!(logout, Ok(Action::Logout(_))));

            let whoami = handler(&commands::new().get_matches_from(vec!["sovs", "whoami"]));
            assert!(matches!(whoami, Ok(Action::WhoAmI(_))));
        });
    }

    #[test]
    fn live_backend_without_endpoints_fails() {
        cleared(|| {
            let matches =
                commands::new().get_matches_from(vec!["sovs", "login", "--backend", "live"]);
            assert!(handler(&matches).is_err());
        });
    }
}
