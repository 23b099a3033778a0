use std::time::Duration;

use clap::{Arg, ArgMatches, Command};

pub const CMD_LOGIN: &str = "login";
pub const CMD_LOGOUT: &str = "logout";
pub const CMD_WHOAMI: &str = "whoami";
pub const ARG_IDENTIFIER: &str = "identifier";
pub const ARG_RESEND_COOLDOWN: &str = "resend-cooldown-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub identifier: Option<String>,
    pub resend_cooldown: Duration,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            identifier: matches
                .get_one::<String>(ARG_IDENTIFIER)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            resend_cooldown: Duration::from_secs(
                matches
                    .get_one::<u64>(ARG_RESEND_COOLDOWN)
                    .copied()
                    .unwrap_or(60),
            ),
        }
    }
}

#[must_use]
pub fn command() -> Command {
    Command::new(CMD_LOGIN)
        .about("Sign in with a one-time passcode")
        .arg(
            Arg::new(ARG_IDENTIFIER)
                .help("Registered phone number or email (prompted when omitted)")
                .index(1),
        )
        .arg(
            Arg::new(ARG_RESEND_COOLDOWN)
                .long(ARG_RESEND_COOLDOWN)
                .help("Seconds to wait before a new passcode can be requested")
                .env("SOVS_RESEND_COOLDOWN_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[must_use]
pub fn logout_command() -> Command {
    Command::new(CMD_LOGOUT).about("Sign out and forget the stored session")
}

#[must_use]
pub fn whoami_command() -> Command {
    Command::new(CMD_WHOAMI).about("Show the signed-in voter")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_identifier_is_trimmed() {
        temp_env::with_var("SOVS_RESEND_COOLDOWN_SECONDS", None::<&str>, || {
            let matches = command().get_matches_from(vec![CMD_LOGIN, " +1987654321 "]);
            let options = Options::parse(&matches);
            assert_eq!(options.identifier.as_deref(), Some("+1987654321"));
            assert_eq!(options.resend_cooldown, Duration::from_secs(60));
        });
    }

    #[test]
    fn test_login_without_identifier() {
        let matches =
            command().get_matches_from(vec![CMD_LOGIN, "--resend-cooldown-seconds", "30"]);
        let options = Options::parse(&matches);
        assert!(options.identifier.is_none());
        assert_eq!(options.resend_cooldown, Duration::from_secs(30));
    }
}
