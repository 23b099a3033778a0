//! Tunables for the registration and login flows.

use std::time::Duration;

const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_DEBOUNCE_MS: u64 = 500;
const DEFAULT_PLACEHOLDER_EMAIL_DOMAIN: &str = "sovs.local";
const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;
const DEFAULT_STRONG_PASSWORD_LENGTH: usize = 12;
const DEFAULT_RESEND_COOLDOWN_SECONDS: u64 = 60;

#[derive(Clone, Debug)]
pub struct RegistrationConfig {
    poll_interval: Duration,
    debounce: Duration,
    placeholder_email_domain: String,
    min_password_length: usize,
    strong_password_length: usize,
    resend_cooldown: Duration,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrationConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            placeholder_email_domain: DEFAULT_PLACEHOLDER_EMAIL_DOMAIN.to_string(),
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
            strong_password_length: DEFAULT_STRONG_PASSWORD_LENGTH,
            resend_cooldown: Duration::from_secs(DEFAULT_RESEND_COOLDOWN_SECONDS),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    #[must_use]
    pub fn with_placeholder_email_domain(mut self, domain: String) -> Self {
        self.placeholder_email_domain = domain;
        self
    }

    #[must_use]
    pub fn with_min_password_length(mut self, length: usize) -> Self {
        self.min_password_length = length;
        self
    }

    #[must_use]
    pub fn with_resend_cooldown(mut self, cooldown: Duration) -> Self {
        self.resend_cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    #[must_use]
    pub fn placeholder_email_domain(&self) -> &str {
        &self.placeholder_email_domain
    }

    #[must_use]
    pub fn min_password_length(&self) -> usize {
        self.min_password_length
    }

    #[must_use]
    pub fn strong_password_length(&self) -> usize {
        self.strong_password_length
    }

    #[must_use]
    pub fn resend_cooldown(&self) -> Duration {
        self.resend_cooldown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_config_defaults_and_overrides() {
        let config = RegistrationConfig::new();

        assert_eq!(config.poll_interval(), Duration::from_secs(3));
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_eq!(config.placeholder_email_domain(), "sovs.local");
        assert_eq!(config.min_password_length(), 8);
        assert_eq!(config.strong_password_length(), 12);
        assert_eq!(config.resend_cooldown(), Duration::from_secs(60));

        let config = config
            .with_poll_interval(Duration::from_secs(1))
            .with_debounce(Duration::from_millis(50))
            .with_placeholder_email_domain("voters.test".to_string())
            .with_min_password_length(10)
            .with_resend_cooldown(Duration::from_secs(5));

        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.debounce(), Duration::from_millis(50));
        assert_eq!(config.placeholder_email_domain(), "voters.test");
        assert_eq!(config.min_password_length(), 10);
        assert_eq!(config.resend_cooldown(), Duration::from_secs(5));
    }
}
