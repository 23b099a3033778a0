pub mod connect;
pub mod login;
pub mod register;
pub mod session;

mod prompt;
// Internal "interpreter" for `Action`; the match lives in `run` so this module stays small.
mod run;

use crate::cli::globals::GlobalArgs;

#[derive(Debug)]
pub enum Action {
    Register(register::Args),
    Login(login::Args),
    Logout(GlobalArgs),
    WhoAmI(GlobalArgs),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
