//! # SOVS (Voter Registration & Login Client)
//!
//! `sovs` drives the applicant side of voter registration: identity
//! verification, contact confirmation, password setup and account creation,
//! followed by passcode login for registered voters.
//!
//! ## Registration
//!
//! Identity is proven either through a hosted verification provider, which
//! redirects back to the client when done, or by capturing a document on the
//! device. A verified identity is matched against the government record source
//! before the account is provisioned.
//!
//! - **Resumable:** the in-progress verification session and the form draft
//!   are persisted, so a crash or a redirect round trip picks up where the
//!   applicant left off.
//! - **Idempotent provisioning:** retries and double submits converge on the
//!   same auth identity and the same application record.
//! - **Session isolation:** a draft is only ever restored into the session it
//!   was written for.
//!
//! ## Login
//!
//! Registered voters sign in with a one-time passcode sent to their phone or
//! email. Passcodes come from the auth provider, or are issued locally when
//! running against the in-memory backend.
//!
//! ## Backends
//!
//! Every external system sits behind a trait in [`backend`]. The live strategy
//! talks HTTP to the hosted functions and auth APIs; the mock strategy keeps
//! everything in process.

pub mod backend;
pub mod cli;
pub mod login;
pub mod registration;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with("sovs/"));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
