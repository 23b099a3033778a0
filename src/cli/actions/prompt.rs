//! Terminal prompts, run off the async workers.

use dialoguer::{theme::ColorfulTheme, Input, Password, Select};
use secrecy::SecretString;
use tracing::warn;

/// Run a blocking prompt; any failure (including Ctrl-C) reads as "backed out".
async fn blocking<T, F>(f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> dialoguer::Result<Option<T>> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            warn!("prompt failed: {err}");
            None
        }
        Err(err) => {
            warn!("prompt task failed: {err}");
            None
        }
    }
}

pub(crate) async fn text(prompt: &str, initial: Option<String>, allow_empty: bool) -> Option<String> {
    let prompt = prompt.to_string();
    blocking(move || {
        let theme = ColorfulTheme::default();
        let mut input = Input::<String>::with_theme(&theme)
            .with_prompt(prompt)
            .allow_empty(allow_empty);
        if let Some(initial) = initial.filter(|value| !value.is_empty()) {
            input = input.with_initial_text(initial);
        }
        input.interact_text().map(|value| Some(value.trim().to_string()))
    })
    .await
}

pub(crate) async fn secret(prompt: &str) -> Option<SecretString> {
    let prompt = prompt.to_string();
    blocking(move || {
        Password::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()
            .map(|value| Some(SecretString::from(value)))
    })
    .await
}

pub(crate) async fn select(prompt: &str, items: &[&str]) -> Option<usize> {
    let prompt = prompt.to_string();
    let items: Vec<String> = items.iter().map(|item| (*item).to_string()).collect();
    blocking(move || {
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .items(&items)
            .default(0)
            .interact_opt()
    })
    .await
}
