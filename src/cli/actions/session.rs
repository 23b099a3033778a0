use std::time::Duration;

use anyhow::Result;

use super::connect::connect;
use super::login::welcome;
use crate::cli::globals::GlobalArgs;
use crate::login::LoginFlow;

async fn login_flow(globals: &GlobalArgs) -> Result<LoginFlow> {
    let connection = connect(globals).await?;
    Ok(LoginFlow::new(
        &connection.backends,
        connection.passcodes,
        Duration::ZERO,
    ))
}

/// Sign out and drop the stored session.
/// # Errors
/// Returns an error if the backend cannot be reached.
pub async fn logout(globals: &GlobalArgs) -> Result<()> {
    let mut flow = login_flow(globals).await?;
    flow.sign_out().await;
    println!("Signed out.");
    Ok(())
}

/// Show the voter of the stored session.
/// # Errors
/// Returns an error if the backend cannot be reached.
pub async fn whoami(globals: &GlobalArgs) -> Result<()> {
    let flow = login_flow(globals).await?;
    match flow.current_session().await {
        Some(session) => println!(
            "{}, since {}",
            welcome(&session),
            session.logged_in_at.format("%Y-%m-%d %H:%M UTC")
        ),
        None => println!("Not signed in."),
    }
    Ok(())
}
