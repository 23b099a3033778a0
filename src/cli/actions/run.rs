use crate::cli::actions::{login, register, session, Action};
use anyhow::Result;

/// Execute the provided action.
// Single dispatch point for all CLI actions.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Register(args) => register::execute(args).await,
        Action::Login(args) => login::execute(args).await,
        Action::Logout(globals) => session::logout(&globals).await,
        Action::WhoAmI(globals) => session::whoami(&globals).await,
    }
}
