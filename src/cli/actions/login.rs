use anyhow::{bail, Context, Result};
use secrecy::ExposeSecret;
use tokio::sync::mpsc;
use tracing::info;

use super::connect::{connect, Connection};
use super::prompt;
use crate::backend::PasscodeTarget;
use crate::cli::commands::login::Options;
use crate::cli::globals::GlobalArgs;
use crate::login::otp::Delivery;
use crate::login::{LoginError, LoginFlow, LoginSession};
use crate::registration::ErrorKind;

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub options: Options,
}

fn channel(target: &PasscodeTarget) -> &'static str {
    match target {
        PasscodeTarget::Email(_) => "email",
        PasscodeTarget::Sms(_) => "SMS",
    }
}

/// Print passcodes issued by the local authority; the mock backend has no
/// real delivery channel.
fn show_local_deliveries(deliveries: &mut Option<mpsc::UnboundedReceiver<Delivery>>) {
    let Some(deliveries) = deliveries.as_mut() else {
        return;
    };
    while let Ok(delivery) = deliveries.try_recv() {
        println!(
            "[mock {}] passcode for {}: {}",
            channel(&delivery.target),
            delivery.target.address(),
            delivery.code
        );
    }
}

pub(crate) fn welcome(session: &LoginSession) -> String {
    format!(
        "Signed in as {} {} ({})",
        session.user.name, session.user.surname, session.user.phone_number
    )
}

/// Execute the login action.
/// # Errors
/// Returns an error if no passcode can be sent or the applicant gives up.
pub async fn execute(args: Args) -> Result<()> {
    let Connection {
        backends,
        passcodes,
        mut deliveries,
    } = connect(&args.globals).await?;
    let mut flow = LoginFlow::new(&backends, passcodes, args.options.resend_cooldown);

    let identifier = match args.options.identifier {
        Some(identifier) => identifier,
        None => prompt::text("Phone number or email", None, false)
            .await
            .context("login cancelled")?,
    };

    let target = flow
        .request_passcode(&identifier)
        .await
        .context("failed to send passcode")?;
    println!(
        "A 6-digit code was sent by {} to {}.",
        channel(&target),
        target.address()
    );
    show_local_deliveries(&mut deliveries);

    loop {
        let Some(code) = prompt::secret("Code (leave empty to resend)").await else {
            bail!("login cancelled");
        };

        if code.expose_secret().is_empty() {
            match flow.request_passcode(&identifier).await {
                Ok(_) => {
                    println!("A new code was sent.");
                    show_local_deliveries(&mut deliveries);
                }
                Err(err) if err.kind() != ErrorKind::FatalExternal => println!("{err}"),
                Err(err) => return Err(err).context("failed to resend passcode"),
            }
            continue;
        }

        match flow.verify_passcode(code.expose_secret()).await {
            Ok(session) => {
                info!(user_id = %session.user.user_id, "login finished");
                println!("{}", welcome(&session));
                return Ok(());
            }
            Err(err @ LoginError::Backend(_)) => return Err(err).context("login failed"),
            Err(err) => println!("{err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UserRecord;
    use crate::registration::types::AccountStatus;
    use chrono::Utc;

    #[test]
    fn channel_names() {
        assert_eq!(channel(&PasscodeTarget::Email("a@b.c".to_string())), "email");
        assert_eq!(channel(&PasscodeTarget::Sms("+1".to_string())), "SMS");
    }

    #[test]
    fn local_deliveries_are_drained() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut deliveries = Some(rx);
        assert!(tx
            .send(Delivery {
                target: PasscodeTarget::Sms("+1987654321".to_string()),
                code: "123456".to_string(),
            })
            .is_ok());

        show_local_deliveries(&mut deliveries);
        assert!(deliveries
            .as_mut()
            .map_or(false, |rx| rx.try_recv().is_err()));

        let mut none = None;
        show_local_deliveries(&mut none);
    }

    #[test]
    fn welcome_names_the_voter() {
        let session = LoginSession {
            user: UserRecord {
                user_id: "u-1".to_string(),
                phone_number: "+1987654321".to_string(),
                email: None,
                name: "Jane".to_string(),
                surname: "Smith".to_string(),
                date_of_birth: "1985-03-22".to_string(),
                national_id: None,
                status: AccountStatus::Verified,
            },
            logged_in_at: Utc::now(),
        };
        assert_eq!(welcome(&session), "Signed in as Jane Smith (+1987654321)");
    }
}
