//! Input validation for the registration steps.

use once_cell::sync::Lazy;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};

use super::error::ValidationError;
use super::types::{ContactInfo, VerifiedIdentity};

static SYMBOL: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9\s]").ok());

/// Validate contact details and return them trimmed.
///
/// Only presence is enforced for the phone number; the email is optional and
/// only needs an `@` when given.
///
/// # Errors
/// Returns the first failing rule.
pub fn validate_contact(phone_number: &str, email: &str) -> Result<ContactInfo, ValidationError> {
    let phone_number = phone_number.trim();
    if phone_number.is_empty() {
        return Err(ValidationError::PhoneRequired);
    }

    let email = email.trim();
    if !email.is_empty() && !email.contains('@') {
        return Err(ValidationError::InvalidEmail);
    }

    Ok(ContactInfo {
        phone_number: phone_number.to_string(),
        email: if email.is_empty() {
            None
        } else {
            Some(email.to_string())
        },
    })
}

/// # Errors
/// Returns an error when the password is blank, shorter than `min_length`, or
/// differs from `confirmation`.
pub fn validate_password(
    password: &SecretString,
    confirmation: &SecretString,
    min_length: usize,
) -> Result<(), ValidationError> {
    let password = password.expose_secret();
    if password.trim().is_empty() {
        return Err(ValidationError::PasswordRequired);
    }
    if password.chars().count() < min_length {
        return Err(ValidationError::PasswordTooShort { min: min_length });
    }
    if password != confirmation.expose_secret() {
        return Err(ValidationError::PasswordMismatch);
    }
    Ok(())
}

/// # Errors
/// Returns [`ValidationError::NationalIdMissing`] when the verified identity has no document number.
pub fn require_national_id(identity: &VerifiedIdentity) -> Result<&str, ValidationError> {
    let national_id = identity.document_number.trim();
    if national_id.is_empty() {
        Err(ValidationError::NationalIdMissing)
    } else {
        Ok(national_id)
    }
}

/// Advisory password rating shown next to the password field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PasswordStrength {
    Weak,
    Fair,
    Good,
    Strong,
}

/// Rate a password; does not affect whether it is accepted.
#[must_use]
pub fn password_strength(password: &str, min_length: usize, strong_length: usize) -> PasswordStrength {
    let length = password.chars().count();
    if length < min_length {
        return PasswordStrength::Weak;
    }

    let mixed_case = password.chars().any(char::is_lowercase) && password.chars().any(char::is_uppercase);
    let digit = password.chars().any(|c| c.is_ascii_digit());
    let symbol = SYMBOL.as_ref().is_some_and(|regex| regex.is_match(password));

    let score = [length >= strong_length, mixed_case, digit, symbol]
        .iter()
        .filter(|met| **met)
        .count();

    match score {
        0 | 1 => PasswordStrength::Weak,
        2 => PasswordStrength::Fair,
        3 => PasswordStrength::Good,
        _ => PasswordStrength::Strong,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[test]
    fn phone_is_required_after_trim() {
        assert_eq!(validate_contact("   ", ""), Err(ValidationError::PhoneRequired));
        let contact = validate_contact(" +15550000 ", "");
        assert_eq!(
            contact,
            Ok(ContactInfo {
                phone_number: "+15550000".to_string(),
                email: None,
            })
        );
    }

    #[test]
    fn email_is_optional_but_needs_at_sign() {
        assert_eq!(
            validate_contact("+15550000", "not-an-email"),
            Err(ValidationError::InvalidEmail)
        );
        assert_eq!(
            validate_contact("+15550000", "a@b.c").map(|contact| contact.email),
            Ok(Some("a@b.c".to_string()))
        );
        assert_eq!(
            validate_contact("+15550000", "").map(|contact| contact.email),
            Ok(None)
        );
    }

    #[test]
    fn password_length_boundary() {
        assert_eq!(
            validate_password(&secret("Passwd1"), &secret("Passwd1"), 8),
            Err(ValidationError::PasswordTooShort { min: 8 })
        );
        assert_eq!(
            validate_password(&secret("Passwd12"), &secret("Passwd12"), 8),
            Ok(())
        );
    }

    #[test]
    fn password_confirmation_must_match() {
        assert_eq!(
            validate_password(&secret("Password1!"), &secret("Password1?"), 8),
            Err(ValidationError::PasswordMismatch)
        );
        assert_eq!(
            validate_password(&secret("short"), &secret("different"), 8),
            Err(ValidationError::PasswordTooShort { min: 8 })
        );
        assert_eq!(
            validate_password(&secret("   "), &secret("   "), 8),
            Err(ValidationError::PasswordRequired)
        );
    }

    #[test]
    fn national_id_must_be_present() {
        let mut identity = VerifiedIdentity {
            session_id: "s-1".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            date_of_birth: "1990-01-01".to_string(),
            document_number: "D123".to_string(),
        };
        assert_eq!(require_national_id(&identity), Ok("D123"));
        identity.document_number = " ".to_string();
        assert_eq!(
            require_national_id(&identity),
            Err(ValidationError::NationalIdMissing)
        );
    }

    #[test]
    fn strength_is_advisory() {
        assert_eq!(password_strength("abc", 8, 12), PasswordStrength::Weak);
        assert_eq!(password_strength("abcdefgh", 8, 12), PasswordStrength::Weak);
        assert_eq!(password_strength("abcdefg1", 8, 12), PasswordStrength::Weak);
        assert_eq!(password_strength("Abcdefg1", 8, 12), PasswordStrength::Fair);
        assert_eq!(password_strength("Password1!", 8, 12), PasswordStrength::Good);
        assert_eq!(password_strength("Password123!", 8, 12), PasswordStrength::Strong);
    }

    #[test]
    fn symbols_are_detected() {
        assert!(SYMBOL.is_some());
        assert_eq!(password_strength("abcdefg!", 8, 12), PasswordStrength::Weak);
        assert_eq!(password_strength("abcdefg1!", 8, 12), PasswordStrength::Fair);
        assert_eq!(password_strength("abcdefg1 ", 8, 12), PasswordStrength::Weak);
    }
}
